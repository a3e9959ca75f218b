//! URL normalization for matching driver events against each other.

/// Normalizes a URL for use as a monitor key.
///
/// Drops the fragment and one trailing slash, so `https://a.example/` and
/// `https://a.example#top` both become `https://a.example`.
pub fn normalise_url(url: &str) -> &str {
    let url = match url.split_once('#') {
        Some((base, _)) => base,
        None => url,
    };
    url.strip_suffix('/').unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_url_strips_fragment_and_slash() {
        assert_eq!(normalise_url("https://a.example/"), "https://a.example");
        assert_eq!(normalise_url("https://a.example/#top"), "https://a.example");
        assert_eq!(normalise_url("https://a.example/x#a#b"), "https://a.example/x");
        assert_eq!(normalise_url("https://a.example/x?q=1"), "https://a.example/x?q=1");
    }

    #[test]
    fn test_normalise_url_strips_only_one_slash() {
        assert_eq!(normalise_url("https://a.example/x//"), "https://a.example/x/");
        assert_eq!(normalise_url(""), "");
    }
}
