//! Derives the flat tag list that gets embedded into a downloaded asset.
//!
//! The output order is a contract: it is exactly the order the tags end
//! up in the asset's metadata container, so nothing here deduplicates,
//! sorts or filters.

use crate::api::data::Post;

/// The category whose tags are emitted bare, without a prefix.
const GENERAL_CATEGORY: &str = "general";

/// Derive the ordered flat tag list for `post`.
///
/// The sequence is, in order:
///
/// 1. every tag of every category, in the record's key order; `general`
///    tags stay bare, any other category is emitted as `{category}: {tag}`
/// 2. `post_parent: {id}` when a parent exists
/// 3. one `post_child: {id}` per child, in listed order
/// 4. the provenance pair `post_site: e621.net` then `post_id: {id}`
/// 5. `md5: {md5}`
/// 6. `rating: {rating}`
/// 7. one `pool: {id}` per pool membership, in listed order
/// 8. one `source: {url}` per source, in listed order
pub fn derive_tags(post: &Post) -> Vec<String> {
    let mut tags = Vec::new();

    for (category, names) in &post.tags {
        for name in names {
            if category == GENERAL_CATEGORY {
                tags.push(name.clone());
            } else {
                tags.push(format!("{category}: {name}"));
            }
        }
    }

    if let Some(parent_id) = post.relationships.parent_id {
        tags.push(format!("post_parent: {parent_id}"));
    }
    for child_id in &post.relationships.children {
        tags.push(format!("post_child: {child_id}"));
    }

    tags.push(String::from("post_site: e621.net"));
    tags.push(format!("post_id: {}", post.id));

    tags.push(format!("md5: {}", post.file.md5));
    tags.push(format!("rating: {}", post.rating));

    for pool_id in &post.pools {
        tags.push(format!("pool: {pool_id}"));
    }
    for source in &post.sources {
        tags.push(format!("source: {source}"));
    }

    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::api::data;
    use crate::api::tests::sample_post;

    fn post_from(body: &str) -> data::Post {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_sample_record_exact_sequence() {
        let tags = derive_tags(&sample_post());
        assert_eq!(
            tags,
            [
                "fox",
                "artist: bob",
                "post_site: e621.net",
                "post_id: 123",
                "md5: abc",
                "rating: s",
                "source: http://src",
            ]
        );
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let post = sample_post();
        assert_eq!(derive_tags(&post), derive_tags(&post));
    }

    #[test]
    fn test_category_prefixes() {
        let post = post_from(
            r#"{
                "id": 9,
                "file": {"ext": "png", "md5": "m", "url": null},
                "tags": {
                    "species": ["red_fox"],
                    "general": ["outside", "snow"],
                    "meta": ["hi_res"]
                },
                "flags": {"deleted": false},
                "relationships": {"parent_id": null, "children": []},
                "rating": "s"
            }"#,
        );

        let tags = derive_tags(&post);
        // category order follows the record, general stays bare
        assert_eq!(
            &tags[..4],
            ["species: red_fox", "outside", "snow", "meta: hi_res"]
        );
    }

    #[test]
    fn test_relationship_tags() {
        let post = post_from(
            r#"{
                "id": 9,
                "file": {"ext": "png", "md5": "m", "url": null},
                "tags": {"general": ["fox"]},
                "flags": {"deleted": false},
                "relationships": {"parent_id": 7, "children": [11, 12]},
                "rating": "q"
            }"#,
        );

        let tags = derive_tags(&post);
        // parent immediately after category tags, children after it,
        // then the fixed provenance pair
        assert_eq!(
            &tags[1..6],
            [
                "post_parent: 7",
                "post_child: 11",
                "post_child: 12",
                "post_site: e621.net",
                "post_id: 9",
            ]
        );
    }

    #[test]
    fn test_no_parent_tag_when_parent_is_null() {
        let tags = derive_tags(&sample_post());
        assert!(!tags.iter().any(|tag| tag.starts_with("post_parent: ")));

        let count = tags
            .iter()
            .filter(|tag| tag.starts_with("post_site: "))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_pool_and_source_tags() {
        let post = post_from(
            r#"{
                "id": 9,
                "file": {"ext": "png", "md5": "m", "url": null},
                "tags": {},
                "flags": {"deleted": false},
                "relationships": {"parent_id": null, "children": []},
                "rating": "e",
                "pools": [31, "winter-special"],
                "sources": ["http://a", "http://b"]
            }"#,
        );

        let tags = derive_tags(&post);
        assert_eq!(
            tags,
            [
                "post_site: e621.net",
                "post_id: 9",
                "md5: m",
                "rating: e",
                "pool: 31",
                "pool: winter-special",
                "source: http://a",
                "source: http://b",
            ]
        );
    }
}
