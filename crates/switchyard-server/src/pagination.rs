//! Opaque cursors over catalog listings.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use switchyard_protocol::{McpError, McpResult};

const PREFIX: &str = "offset:";

pub(crate) fn encode_cursor(offset: usize) -> String {
    URL_SAFE_NO_PAD.encode(format!("{PREFIX}{offset}"))
}

pub(crate) fn decode_cursor(cursor: &str) -> McpResult<usize> {
    let invalid = || McpError::invalid_params(format!("invalid cursor '{cursor}'"));
    let bytes = URL_SAFE_NO_PAD.decode(cursor).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    text.strip_prefix(PREFIX)
        .and_then(|n| n.parse().ok())
        .ok_or_else(invalid)
}

/// One page of `items` starting at `cursor`, plus the cursor for the next page
pub(crate) fn paginate<T: Clone>(
    items: &[T],
    cursor: Option<&str>,
    page_size: Option<usize>,
) -> McpResult<(Vec<T>, Option<String>)> {
    let start = match cursor {
        Some(c) => decode_cursor(c)?,
        None => 0,
    };
    if start > items.len() {
        return Err(McpError::invalid_params("cursor is past the end of the list"));
    }
    let end = match page_size {
        Some(size) if size > 0 => (start + size).min(items.len()),
        _ => items.len(),
    };
    let next = (end < items.len()).then(|| encode_cursor(end));
    Ok((items[start..end].to_vec(), next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_protocol::ErrorKind;

    #[test]
    fn test_walks_all_pages() {
        let items: Vec<u32> = (0..5).collect();
        let (first, next) = paginate(&items, None, Some(2)).unwrap();
        assert_eq!(first, vec![0, 1]);
        let (second, next) = paginate(&items, next.as_deref(), Some(2)).unwrap();
        assert_eq!(second, vec![2, 3]);
        let (last, next) = paginate(&items, next.as_deref(), Some(2)).unwrap();
        assert_eq!(last, vec![4]);
        assert!(next.is_none());
    }

    #[test]
    fn test_unpaged_listing() {
        let items = vec!["a", "b"];
        let (all, next) = paginate(&items, None, None).unwrap();
        assert_eq!(all.len(), 2);
        assert!(next.is_none());
    }

    #[test]
    fn test_garbage_cursor() {
        let err = paginate(&[1], Some("%%%"), None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParams);
        let err = paginate(&[1], Some(&encode_cursor(9)), None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParams);
    }
}
