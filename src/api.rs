//! A core module for interacting with the e621 API.
//!
//! Usually, you prefer to use the [`Getter`] struct to fetch a single
//! [`data::Post`], or [`ListGetter`] to fetch a page of posts.

use std::str::FromStr;
use std::sync::LazyLock;

use indexmap::IndexMap;
use reqwest::header::USER_AGENT;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The URLs for the e621 API.
pub mod url {
    use super::*;

    /// The base URL of the e621 site.
    pub const BASE_URL: &str = "https://e621.net";

    /// The collection endpoint, which can be used to query pages of posts.
    pub static POSTS_URL: LazyLock<Url> = LazyLock::new(|| {
        // see: https://e621.net/help/api
        Url::parse(&format!("{BASE_URL}/posts.json")).unwrap()
    });

    /// The single-post endpoint for `post_id`.
    pub fn post_url(post_id: u64) -> Url {
        Url::parse(&format!("{BASE_URL}/posts/{post_id}.json"))
            .expect("a numeric post id always forms a valid endpoint URL")
    }

    /// The canonical post page for `post_id`, which can be used to display the post.
    ///
    /// This is what gets embedded as the asset title.
    pub fn post_page(post_id: u64) -> String {
        format!("{BASE_URL}/posts/{post_id}")
    }
}

/// The maximum `limit` accepted by the collection endpoint.
///
/// See: <https://e621.net/help/api>
pub const MAX_PAGE_LIMIT: u64 = 320;

/// `username:api_key` credentials for HTTP basic auth.
///
/// e621 serves everything this crate needs anonymously; credentials
/// raise the rate limit and unlock per-account filters.
#[derive(Debug, Clone, Deserialize)]
pub struct Auth {
    /// The account name.
    pub username: String,
    /// The API key, *not* the account password.
    pub api_key: String,
}

impl FromStr for Auth {
    type Err = anyhow::Error;

    /// Parse the `username:api_key` form used on the command line.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (username, api_key) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("credentials must be in `username:api_key` form"))?;
        if username.is_empty() || api_key.is_empty() {
            return Err(anyhow::anyhow!(
                "neither the username nor the api key may be empty"
            ));
        }
        Ok(Auth {
            username: username.to_owned(),
            api_key: api_key.to_owned(),
        })
    }
}

/// The paging direction of the collection endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDirection {
    /// Posts with an id lower than the cursor (`b{id}`).
    Before,
    /// Posts with an id higher than the cursor (`a{id}`).
    After,
}

impl PageDirection {
    /// The `page` query value for this direction and cursor id.
    pub(crate) fn cursor(self, page: u64) -> String {
        match self {
            PageDirection::Before => format!("b{page}"),
            PageDirection::After => format!("a{page}"),
        }
    }
}

impl FromStr for PageDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "before" => Ok(PageDirection::Before),
            "after" => Ok(PageDirection::After),
            other => Err(anyhow::anyhow!(
                "page direction must be `before` or `after`, got `{other}`"
            )),
        }
    }
}

/// The error type for a [`Getter`]/[`ListGetter`] run.
///
/// A non-success HTTP status is *not* an error, see [`Getter::run`].
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FetchError {
    /// The request itself failed (DNS, TLS, timeout, ...).
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    /// The server answered with a body this crate cannot decode.
    #[error("malformed API record: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The data structures for the JSON responses from the e621 API.
pub mod data {
    use super::*;

    /// The sub-records of a [`Post`].
    pub mod field {
        use super::*;

        /// The `file` field of a post record.
        #[non_exhaustive]
        #[derive(Debug, Clone, Deserialize, Serialize)]
        pub struct File {
            /// Pixel width.
            #[serde(default)]
            pub width: u64,
            /// Pixel height.
            #[serde(default)]
            pub height: u64,
            /// The file extension, without the dot.
            pub ext: String,
            /// Size in bytes.
            #[serde(default)]
            pub size: u64,
            /// The MD5 checksum of the file.
            pub md5: String,
            /// The download URL. `None` when access is restricted.
            pub url: Option<String>,
        }

        /// The `flags` field of a post record.
        #[non_exhaustive]
        #[derive(Debug, Clone, Deserialize, Serialize)]
        pub struct Flags {
            /// The post was deleted; its file is no longer served.
            pub deleted: bool,
            /// The post is pending approval.
            #[serde(default)]
            pub pending: bool,
            /// The post is flagged for deletion.
            #[serde(default)]
            pub flagged: bool,
        }

        /// The `relationships` field of a post record.
        #[non_exhaustive]
        #[derive(Debug, Clone, Deserialize, Serialize)]
        pub struct Relationships {
            /// The parent post, if any.
            pub parent_id: Option<u64>,
            /// The child posts, oldest first.
            #[serde(default)]
            pub children: Vec<u64>,
        }

        /// A pool membership id.
        ///
        /// The API serves numeric ids today, but membership identifiers
        /// are allowed to be slugs as well, so both shapes decode.
        #[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
        #[serde(untagged)]
        pub enum PoolId {
            /// A numeric pool id.
            Id(u64),
            /// A named pool identifier.
            Slug(String),
        }

        impl std::fmt::Display for PoolId {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    PoolId::Id(id) => write!(f, "{id}"),
                    PoolId::Slug(slug) => write!(f, "{slug}"),
                }
            }
        }
    }

    /// One post record.
    ///
    /// Only the fields this crate consumes are modeled; everything the
    /// server sends on top of these is ignored on decode, so the JSON
    /// sidecar contains exactly this shape.
    #[non_exhaustive]
    #[derive(Debug, Clone, Deserialize, Serialize)]
    pub struct Post {
        /// The post id.
        pub id: u64,
        /// The file sub-record.
        pub file: field::File,
        /// Tag names grouped by category, in the server's key order.
        ///
        /// Categories are open-ended, `general` is the distinguished one.
        /// The document order of both keys and names is meaningful: it is
        /// the order tags are embedded in.
        pub tags: IndexMap<String, Vec<String>>,
        /// The status flags.
        pub flags: field::Flags,
        /// Parent/children links.
        pub relationships: field::Relationships,
        /// The rating letter (`s`, `q` or `e`).
        #[serde(default)]
        pub rating: String,
        /// Source URLs, as submitted.
        #[serde(default)]
        pub sources: Vec<String>,
        /// Pools this post belongs to.
        #[serde(default)]
        pub pools: Vec<field::PoolId>,
        /// The free-form description, possibly empty.
        #[serde(default)]
        pub description: String,
    }

    /// The envelope of the single-post endpoint.
    #[non_exhaustive]
    #[derive(Debug, Deserialize, Serialize)]
    pub struct PostJson {
        /// The post record.
        pub post: Post,
    }

    /// The envelope of the collection endpoint.
    #[non_exhaustive]
    #[derive(Debug, Deserialize, Serialize)]
    pub struct PostsJson {
        /// The page of post records.
        pub posts: Vec<Post>,
    }
}

#[inline]
fn apply_auth(request: RequestBuilder, auth: Option<&Auth>) -> RequestBuilder {
    match auth {
        Some(auth) => request.basic_auth(&auth.username, Some(&auth.api_key)),
        None => request,
    }
}

/// A Consuming-Builders style function to fetch one post record.
///
/// # Example
///
/// ```no_run
/// use reqwest::Client;
/// use e621_dl::api::Getter;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::new();
///
///     let post = Getter::build(&client, 123, None, "e621-dl/0.1 (by someone)")?
///         .run()
///         .await?;
///
///     Ok(())
/// }
/// ```
pub struct Getter<'a> {
    client: &'a Client,
    post_id: u64,
    auth: Option<&'a Auth>,
    user_agent: &'a str,
}

impl Getter<'_> {
    /// # Errors
    ///
    /// If `post_id` is zero, or `user_agent` is empty, this function will return an error.
    pub fn build<'a>(
        client: &'a Client,
        post_id: u64,
        auth: Option<&'a Auth>,
        user_agent: &'a str,
    ) -> anyhow::Result<Getter<'a>> {
        if post_id == 0 {
            return Err(anyhow::anyhow!("`post_id` must be a positive integer"));
        }
        // e621's usage policy requires an identifying user agent.
        // see: https://e621.net/help/api
        if user_agent.is_empty() {
            return Err(anyhow::anyhow!("`user_agent` cannot be empty"));
        }
        Ok(Getter {
            client,
            post_id,
            auth,
            user_agent,
        })
    }

    /// Send the request to the e621 API and decode the record.
    ///
    /// Returns `Ok(None)` on any non-success HTTP status: a missing record
    /// is a normal outcome the caller branches on, never a fault.
    ///
    /// # Errors
    ///
    /// If the request fails, or the body does not decode as a post record,
    /// this function will return an error.
    pub async fn run(self) -> Result<Option<data::Post>, FetchError> {
        let request = apply_auth(
            self.client
                .get(url::post_url(self.post_id))
                .header(USER_AGENT, self.user_agent),
            self.auth,
        );

        let response = request.send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }

        let body = response.text().await?;
        let json = serde_json::from_str::<data::PostJson>(&body)?;
        Ok(Some(json.post))
    }
}

/// The companion listing operation: fetch one page of post records.
///
/// The arguments mirror the collection endpoint, see [`ListGetter::build`].
pub struct ListGetter<'a> {
    client: &'a Client,
    page: u64,
    direction: PageDirection,
    limit: u64,
    tag_query: Option<&'a str>,
    include_deleted: bool,
    auth: Option<&'a Auth>,
    user_agent: &'a str,
}

impl ListGetter<'_> {
    /// See <https://e621.net/help/api> for arguments.
    ///
    /// `page` is a post-id cursor paired with a [`PageDirection`]. When
    /// `include_deleted` is set, a `status:any` filter is appended to the
    /// tag query so deleted records show up in the page.
    ///
    /// # Errors
    ///
    /// If `limit` exceeds [`MAX_PAGE_LIMIT`], or `user_agent` is empty,
    /// this function will return an error.
    #[allow(clippy::too_many_arguments)]
    pub fn build<'a>(
        client: &'a Client,
        page: u64,
        direction: PageDirection,
        limit: u64,
        tag_query: Option<&'a str>,
        include_deleted: bool,
        auth: Option<&'a Auth>,
        user_agent: &'a str,
    ) -> anyhow::Result<ListGetter<'a>> {
        if limit > MAX_PAGE_LIMIT {
            return Err(anyhow::anyhow!(
                "`limit` can only be between 0 and {MAX_PAGE_LIMIT}"
            ));
        }
        if user_agent.is_empty() {
            return Err(anyhow::anyhow!("`user_agent` cannot be empty"));
        }
        Ok(ListGetter {
            client,
            page,
            direction,
            limit,
            tag_query,
            include_deleted,
            auth,
            user_agent,
        })
    }

    /// The effective `tags` query value, with the any-status filter
    /// appended when deleted posts are wanted.
    fn tags_param(&self) -> Option<String> {
        match (self.tag_query, self.include_deleted) {
            (Some(query), true) => Some(format!("{query} status:any")),
            (Some(query), false) => Some(query.to_owned()),
            (None, true) => Some(String::from("status:any")),
            (None, false) => None,
        }
    }

    /// Send the request to the e621 API and decode the page.
    ///
    /// Returns `Ok(None)` on any non-success HTTP status, like
    /// [`Getter::run`].
    ///
    /// # Errors
    ///
    /// If the request fails, or the body does not decode as a page of
    /// records, this function will return an error.
    pub async fn run(self) -> Result<Option<Vec<data::Post>>, FetchError> {
        let mut target_url = url::POSTS_URL.clone();
        {
            let mut pairs = target_url.query_pairs_mut();
            pairs.append_pair("limit", &self.limit.to_string());
            pairs.append_pair("page", &self.direction.cursor(self.page));
            if let Some(tags) = self.tags_param() {
                pairs.append_pair("tags", &tags);
            }
        }

        let request = apply_auth(
            self.client
                .get(target_url)
                .header(USER_AGENT, self.user_agent),
            self.auth,
        );

        let response = request.send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }

        let body = response.text().await?;
        let json = serde_json::from_str::<data::PostsJson>(&body)?;
        Ok(Some(json.posts))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE_RECORD: &str = r#"{
        "id": 123,
        "file": {
            "width": 800,
            "height": 600,
            "ext": "png",
            "size": 4096,
            "md5": "abc",
            "url": "http://x/abc.png"
        },
        "tags": {
            "general": ["fox"],
            "artist": ["bob"]
        },
        "flags": {
            "deleted": false,
            "pending": false,
            "flagged": false
        },
        "relationships": {
            "parent_id": null,
            "children": []
        },
        "rating": "s",
        "sources": ["http://src"],
        "pools": [],
        "description": ""
    }"#;

    pub(crate) fn sample_post() -> data::Post {
        serde_json::from_str(SAMPLE_RECORD).unwrap()
    }

    #[test]
    fn test_illegal_args() {
        let client = Client::new();

        let resp = Getter::build(&client, 0, None, "ua");
        assert!(resp.is_err());

        let resp = Getter::build(&client, 123, None, "");
        assert!(resp.is_err());

        let resp = ListGetter::build(
            &client,
            123,
            PageDirection::Before,
            MAX_PAGE_LIMIT + 1,
            None,
            false,
            None,
            "ua",
        );
        assert!(resp.is_err());

        // zero is a legal limit, the endpoint treats it as "default page size"
        let resp = ListGetter::build(
            &client,
            123,
            PageDirection::Before,
            0,
            None,
            false,
            None,
            "ua",
        );
        assert!(resp.is_ok());
    }

    #[test]
    fn test_parse_auth() {
        let auth: Auth = "me:secret".parse().unwrap();
        assert_eq!(auth.username, "me");
        assert_eq!(auth.api_key, "secret");

        // the key may itself contain a colon
        let auth: Auth = "me:se:cret".parse().unwrap();
        assert_eq!(auth.api_key, "se:cret");

        assert!("no-colon".parse::<Auth>().is_err());
        assert!(":key".parse::<Auth>().is_err());
        assert!("user:".parse::<Auth>().is_err());
    }

    #[test]
    fn test_parse_page_direction() {
        assert_eq!(
            "before".parse::<PageDirection>().unwrap(),
            PageDirection::Before
        );
        assert_eq!(
            "after".parse::<PageDirection>().unwrap(),
            PageDirection::After
        );
        assert!("sideways".parse::<PageDirection>().is_err());

        assert_eq!(PageDirection::Before.cursor(42), "b42");
        assert_eq!(PageDirection::After.cursor(42), "a42");
    }

    #[test]
    fn test_tags_param() {
        let client = Client::new();
        let build = |tag_query, include_deleted| {
            ListGetter::build(
                &client,
                1,
                PageDirection::Before,
                10,
                tag_query,
                include_deleted,
                None,
                "ua",
            )
            .unwrap()
            .tags_param()
        };

        assert_eq!(build(None, false), None);
        assert_eq!(build(None, true).unwrap(), "status:any");
        assert_eq!(build(Some("fox"), false).unwrap(), "fox");
        assert_eq!(build(Some("fox"), true).unwrap(), "fox status:any");
    }

    #[test]
    fn test_decode_record() {
        let post = sample_post();

        assert_eq!(post.id, 123);
        assert_eq!(post.file.md5, "abc");
        assert_eq!(post.file.url.as_deref(), Some("http://x/abc.png"));
        assert!(!post.flags.deleted);
        assert_eq!(post.relationships.parent_id, None);
        // key order follows the document, not any sorting
        let categories: Vec<&str> = post.tags.keys().map(String::as_str).collect();
        assert_eq!(categories, ["general", "artist"]);
    }

    #[test]
    fn test_decode_malformed_record() {
        // `tags` as a flat array is not a well-formed record
        let body = r#"{"post": {"id": 1, "tags": ["fox"]}}"#;
        let result = serde_json::from_str::<data::PostJson>(body)
            .map_err(FetchError::from)
            .map(|_| ());
        assert!(matches!(result, Err(FetchError::Decode(_))));
    }

    #[test]
    fn test_decode_pool_ids() {
        let ids: Vec<data::field::PoolId> =
            serde_json::from_str(r#"[17, "winter-special"]"#).unwrap();
        assert_eq!(ids[0].to_string(), "17");
        assert_eq!(ids[1].to_string(), "winter-special");
    }
}
