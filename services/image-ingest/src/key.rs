use chrono::Utc;

/// Namespace prefix for every stored image
pub const KEY_NAMESPACE: &str = "images/";

/// Extension of signature-derived keys
pub const KEY_EXTENSION: &str = "png";

/// Extensions kept as-is by the fallback key
const FALLBACK_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

/// Derive the storage key for a content signature.
///
/// Format: `images/{sanitized_signature}.png`
pub fn derive_key(signature: &str) -> String {
    format!(
        "{namespace}{signature}.{extension}",
        namespace = KEY_NAMESPACE,
        signature = sanitize_signature(signature),
        extension = KEY_EXTENSION
    )
}

/// Key for an upload with no signature.
///
/// Format: `images/{millis}-{sanitized_stem}.{ext}`. Not deterministic.
pub fn fallback_key(filename: Option<&str>) -> String {
    fallback_key_at(filename, Utc::now().timestamp_millis())
}

fn fallback_key_at(filename: Option<&str>, millis: i64) -> String {
    let filename = filename.map(str::trim).filter(|f| !f.is_empty());

    let extension = filename
        .and_then(|f| f.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| FALLBACK_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or_else(|| KEY_EXTENSION.to_string());

    let stem = match filename {
        Some(name) => {
            let stem = match name.rsplit_once('.') {
                Some((stem, _)) if !stem.is_empty() => stem,
                _ => name,
            };
            sanitize_filename(stem)
        }
        None => format!("image_{}", millis),
    };

    format!("{}{}-{}.{}", KEY_NAMESPACE, millis, stem, extension)
}

/// Replace characters that are not safe inside a single path segment
fn sanitize_signature(signature: &str) -> String {
    signature
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_plain_signature() {
        assert_eq!(derive_key("abc123"), "images/abc123.png");
    }

    #[test]
    fn test_derive_key_is_stable() {
        let signature = "3938729181,2840201033";
        let first = derive_key(signature);
        for _ in 0..10 {
            assert_eq!(derive_key(signature), first);
        }
        assert_eq!(first, "images/3938729181_2840201033.png");
    }

    #[test]
    fn test_derive_key_sanitizes_path_characters() {
        assert_eq!(derive_key("a/b,c"), "images/a_b_c.png");
        assert_eq!(derive_key("../etc"), "images/___etc.png");
        assert!(!derive_key("x/../../y").contains(".."));
    }

    #[test]
    fn test_fallback_key_keeps_known_extension() {
        assert_eq!(
            fallback_key_at(Some("Red Shoe.JPG"), 1700000000000),
            "images/1700000000000-Red_Shoe.jpg"
        );
        assert_eq!(
            fallback_key_at(Some("mug.webp"), 42),
            "images/42-mug.webp"
        );
    }

    #[test]
    fn test_fallback_key_defaults_to_png() {
        assert_eq!(
            fallback_key_at(Some("scan.tiff"), 7),
            "images/7-scan.png"
        );
        assert_eq!(fallback_key_at(Some("noext"), 7), "images/7-noext.png");
        assert_eq!(fallback_key_at(None, 7), "images/7-image_7.png");
        assert_eq!(fallback_key_at(Some("  "), 7), "images/7-image_7.png");
    }

    #[test]
    fn test_fallback_key_uses_current_time() {
        let key = fallback_key(Some("a.png"));
        assert!(key.starts_with(KEY_NAMESPACE));
        assert!(key.ends_with("-a.png"));
    }
}
