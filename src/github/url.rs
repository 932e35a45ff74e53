//! Repository URL resolution

use url::Url;

use super::GithubError;

/// Split a repository URL into `(owner, name)`.
///
/// Accepts `https://github.com/{owner}/{repo}` with an optional `.git`
/// suffix, trailing slash, or deeper path (`/tree/main/docs`).
pub fn parse_repository_url(input: &str) -> Result<(String, String), GithubError> {
    let invalid = || GithubError::InvalidReference(input.to_string());

    let url = Url::parse(input.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }
    match url.host_str() {
        Some("github.com") | Some("www.github.com") => {}
        _ => return Err(invalid()),
    }

    let mut segments = url
        .path_segments()
        .ok_or_else(invalid)?
        .filter(|s| !s.is_empty());
    let owner = segments.next().ok_or_else(invalid)?;
    let repo = segments.next().ok_or_else(invalid)?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if repo.is_empty() {
        return Err(invalid());
    }

    Ok((owner.to_string(), repo.to_string()))
}
