use crate::reddit::Post;

/// Outbound URLs must point at a raster image for the grid to show them.
const IMAGE_EXTENSIONS: [&str; 2] = [".jpg", ".png"];

/// One displayable wallpaper, distilled from a raw listing post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryItem {
    pub id: String,
    pub title: String,
    pub thumbnail_url: String,
    pub full_url: String,
}

impl GalleryItem {
    /// Maps a raw post into a gallery item, or drops it when it is not a
    /// directly displayable image. The thumbnail prefers the third preview
    /// resolution (with the HTML-escaped ampersand decoded) and falls back
    /// to the post's own thumbnail field.
    pub fn from_post(post: &Post) -> Option<GalleryItem> {
        let full_url = post.url_overridden_by_dest.as_str();
        if !is_image_url(full_url) {
            return None;
        }
        let thumbnail_url = resolve_thumbnail(post)?;
        if !thumbnail_url.starts_with("http") {
            return None;
        }
        Some(GalleryItem {
            id: post.id.clone(),
            title: post.title.clone(),
            thumbnail_url,
            full_url: full_url.to_string(),
        })
    }

    pub fn extension_label(&self) -> &'static str {
        if self.full_url.ends_with(".png") {
            "PNG"
        } else {
            "JPG"
        }
    }
}

pub fn is_image_url(url: &str) -> bool {
    IMAGE_EXTENSIONS.iter().any(|ext| url.ends_with(ext))
}

fn resolve_thumbnail(post: &Post) -> Option<String> {
    post.preview
        .images
        .first()
        .and_then(|image| image.resolutions.get(2))
        .map(|source| source.url.replace("&amp;", "&"))
        .filter(|url| !url.is_empty())
        .or_else(|| {
            if post.thumbnail.is_empty() {
                None
            } else {
                Some(post.thumbnail.clone())
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reddit::{Preview, PreviewImage, PreviewSource};

    fn post(full_url: &str, thumbnail: &str) -> Post {
        Post {
            id: "abc".into(),
            title: "Misty forest".into(),
            thumbnail: thumbnail.into(),
            url_overridden_by_dest: full_url.into(),
            preview: Preview::default(),
        }
    }

    fn with_resolutions(mut post: Post, urls: &[&str]) -> Post {
        post.preview.images = vec![PreviewImage {
            source: PreviewSource::default(),
            resolutions: urls
                .iter()
                .map(|url| PreviewSource {
                    url: (*url).into(),
                    width: 0,
                    height: 0,
                })
                .collect(),
        }];
        post
    }

    #[test]
    fn prefers_third_preview_resolution_and_decodes_ampersand() {
        let post = with_resolutions(
            post("https://i.example/full.jpg", "https://t.example/low.jpg"),
            &[
                "https://p.example/r0.jpg",
                "https://p.example/r1.jpg",
                "https://p.example/r2.jpg?s=1&amp;x=2",
            ],
        );
        let item = GalleryItem::from_post(&post).unwrap();
        assert_eq!(item.thumbnail_url, "https://p.example/r2.jpg?s=1&x=2");
        assert_eq!(item.full_url, "https://i.example/full.jpg");
    }

    #[test]
    fn falls_back_to_post_thumbnail_when_preview_is_short() {
        let post = with_resolutions(
            post("https://i.example/full.png", "https://t.example/low.jpg"),
            &["https://p.example/r0.jpg"],
        );
        let item = GalleryItem::from_post(&post).unwrap();
        assert_eq!(item.thumbnail_url, "https://t.example/low.jpg");
    }

    #[test]
    fn drops_non_image_outbound_urls() {
        for url in [
            "https://v.example/clip.gifv",
            "https://v.example/clip.mp4",
            "https://www.example.com/gallery/abc",
            "",
        ] {
            assert!(
                GalleryItem::from_post(&post(url, "https://t.example/low.jpg")).is_none(),
                "expected {url:?} to be dropped"
            );
        }
    }

    #[test]
    fn drops_items_without_http_thumbnail() {
        // Reddit uses placeholder words like "self" and "default" here.
        assert!(GalleryItem::from_post(&post("https://i.example/full.jpg", "self")).is_none());
        assert!(GalleryItem::from_post(&post("https://i.example/full.jpg", "default")).is_none());
        assert!(GalleryItem::from_post(&post("https://i.example/full.jpg", "")).is_none());
    }

    #[test]
    fn extension_label_matches_url() {
        let jpg = GalleryItem::from_post(&post(
            "https://i.example/full.jpg",
            "https://t.example/low.jpg",
        ))
        .unwrap();
        assert_eq!(jpg.extension_label(), "JPG");
        let png = GalleryItem::from_post(&post(
            "https://i.example/full.png",
            "https://t.example/low.jpg",
        ))
        .unwrap();
        assert_eq!(png.extension_label(), "PNG");
    }
}
