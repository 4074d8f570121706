/// Returns the scheme of a url-like string (`https`, `file`, ...), or `None`
/// if the string does not start with a valid scheme followed by `://`.
pub(crate) fn parse_scheme(url: &str) -> Option<&str> {
    let (scheme, _) = url.split_once("://")?;
    if scheme.is_empty() {
        return None;
    }
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    chars
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        .then_some(scheme)
}

/// Ensures the path of the url ends with a `/` so that [`url::Url::join`]
/// treats it as a directory.
pub(crate) fn add_trailing_slash(url: &url::Url) -> std::borrow::Cow<'_, url::Url> {
    let path = url.path();
    if path.ends_with('/') {
        std::borrow::Cow::Borrowed(url)
    } else {
        let mut url = url.clone();
        url.set_path(&format!("{path}/"));
        std::borrow::Cow::Owned(url)
    }
}

#[cfg(test)]
mod test {
    use super::parse_scheme;

    #[test]
    fn schemes() {
        assert_eq!(parse_scheme("https://foo"), Some("https"));
        assert_eq!(parse_scheme("file:///foo"), Some("file"));
        assert_eq!(parse_scheme("conda-forge"), None);
        assert_eq!(parse_scheme("://foo"), None);
        assert_eq!(parse_scheme("1ttp://foo"), None);
    }
}
