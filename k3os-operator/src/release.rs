use crate::error::{
    IncompleteChannelUrl, ParseChannelUrl, Result, UnknownChannelScheme, UpstreamMalformed,
    UpstreamUnavailable,
};
use async_trait::async_trait;
use serde::Deserialize;
use snafu::{ensure, ResultExt};
use url::Url;

/// A concrete upstream release.
#[derive(Clone, Debug, PartialEq)]
pub struct Release {
    pub name: String,
}

/// Resolves a channel to its latest available release. Lookups are network
/// operations with no caching at this layer.
#[async_trait]
pub trait ReleaseChannel: Send + Sync {
    async fn latest(&self) -> Result<Release>;
}

/// Resolve a channel locator to its driver by URL scheme.
pub fn channel_for(url: &str) -> Result<Box<dyn ReleaseChannel>> {
    let parsed = Url::parse(url).context(ParseChannelUrl {
        url: url.to_string(),
    })?;
    match parsed.scheme() {
        GithubReleases::SCHEME => Ok(Box::new(GithubReleases::from_url(&parsed, url)?)),
        _ => UnknownChannelScheme {
            url: url.to_string(),
        }
        .fail(),
    }
}

/// Resolution seam for the channel reconciler; production resolves through
/// the scheme registry on every call.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn latest(&self, url: &str) -> Result<Release>;
}

pub struct SchemeResolver;

#[async_trait]
impl Resolver for SchemeResolver {
    async fn latest(&self, url: &str) -> Result<Release> {
        channel_for(url)?.latest().await
    }
}

/// Latest-release driver for `github-releases://<owner>/<repo>`.
pub struct GithubReleases {
    owner: String,
    repo: String,
    api: String,
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    name: Option<String>,
    tag_name: String,
}

impl From<GithubRelease> for Release {
    fn from(release: GithubRelease) -> Self {
        // GitHub permits unnamed releases; an empty version would wedge the
        // channel in a poll loop, so fall back to the tag
        let name = release
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(release.tag_name);
        Release { name }
    }
}

impl GithubReleases {
    pub const SCHEME: &'static str = "github-releases";
    const API: &'static str = "https://api.github.com";

    fn from_url(parsed: &Url, raw: &str) -> Result<Self> {
        let owner = parsed.host_str().unwrap_or_default();
        let repo = parsed.path().trim_matches('/');
        ensure!(
            !owner.is_empty() && !repo.is_empty() && !repo.contains('/'),
            IncompleteChannelUrl {
                url: raw.to_string()
            }
        );
        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            api: Self::API.to_string(),
        })
    }

    #[cfg(test)]
    fn with_api(mut self, api: &str) -> Self {
        self.api = api.to_string();
        self
    }
}

#[async_trait]
impl ReleaseChannel for GithubReleases {
    async fn latest(&self) -> Result<Release> {
        let url = format!(
            "{api}/repos/{owner}/{repo}/releases/latest",
            api = self.api,
            owner = self.owner,
            repo = self.repo
        );
        let release: GithubRelease = reqwest::Client::new()
            .get(&url)
            .header(
                "User-Agent",
                concat!("k3os-operator/", env!("CARGO_PKG_VERSION")),
            )
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .context(UpstreamUnavailable { url: url.clone() })?
            .json()
            .await
            .context(UpstreamMalformed { url: url.clone() })?;
        Ok(release.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn github_urls_split_into_owner_and_repo() {
        let parsed = Url::parse("github-releases://rancher/k3os").unwrap();
        let driver = GithubReleases::from_url(&parsed, "github-releases://rancher/k3os").unwrap();
        assert_eq!(driver.owner, "rancher");
        assert_eq!(driver.repo, "k3os");
    }

    #[test]
    fn incomplete_github_urls_are_rejected() {
        for raw in [
            "github-releases://rancher",
            "github-releases://rancher/",
            "github-releases://rancher/k3os/extra",
        ] {
            let parsed = Url::parse(raw).unwrap();
            assert!(matches!(
                GithubReleases::from_url(&parsed, raw),
                Err(Error::IncompleteChannelUrl { .. })
            ));
        }
    }

    #[test]
    fn unknown_schemes_have_no_driver() {
        assert!(matches!(
            channel_for("gopher://rancher/k3os").err(),
            Some(Error::UnknownChannelScheme { .. })
        ));
        assert!(matches!(
            channel_for("not a url").err(),
            Some(Error::ParseChannelUrl { .. })
        ));
    }

    #[test]
    fn release_name_falls_back_to_the_tag() {
        let named: GithubRelease =
            serde_json::from_str(r#"{"name": "v1.0.0", "tag_name": "v1.0.0-tag"}"#).unwrap();
        assert_eq!(Release::from(named).name, "v1.0.0");

        let unnamed: GithubRelease =
            serde_json::from_str(r#"{"name": null, "tag_name": "v1.0.0"}"#).unwrap();
        assert_eq!(Release::from(unnamed).name, "v1.0.0");

        let blank: GithubRelease =
            serde_json::from_str(r#"{"name": " ", "tag_name": "v1.0.0"}"#).unwrap();
        assert_eq!(Release::from(blank).name, "v1.0.0");
    }

    #[test]
    fn api_base_is_overridable() {
        let parsed = Url::parse("github-releases://rancher/k3os").unwrap();
        let driver = GithubReleases::from_url(&parsed, "github-releases://rancher/k3os")
            .unwrap()
            .with_api("http://127.0.0.1:1");
        assert_eq!(driver.api, "http://127.0.0.1:1");
    }
}
