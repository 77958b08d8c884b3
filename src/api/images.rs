use base64::{engine::general_purpose, Engine as _};
use regex::Regex;
use std::sync::OnceLock;

/// Maximum width token the primary CDN serves.
const CDN_MAX_WIDTH_SEGMENT: &str = "/f1800/";

fn width_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/f\d{2,4}/").expect("width token regex"))
}

fn thumbnail_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"/thumbnails/([0-9a-zA-Z_-]+)_thumb\.(jpg|jpeg|png|webp)")
            .expect("thumbnail regex")
    })
}

/// Rewrite a listing image URL to its highest-resolution variant.
///
/// Deterministic and total: shop hosts serve `/small/` and `/large/`
/// variants of the same path; the primary CDN encodes the width as an
/// `/f{width}/` segment, and its thumbnail paths embed the original image
/// identifier. Anything unrecognized passes through unchanged.
pub fn resolve_full_image_url(url: &str) -> String {
    if url.contains("/small/") {
        return url.replacen("/small/", "/large/", 1);
    }

    if let Some(m) = width_token_re().find(url) {
        let mut out = String::with_capacity(url.len() + 2);
        out.push_str(&url[..m.start()]);
        out.push_str(CDN_MAX_WIDTH_SEGMENT);
        out.push_str(&url[m.end()..]);
        return out;
    }

    if let Some(caps) = thumbnail_re().captures(url) {
        let full = format!("/originals/{}.{}", &caps[1], &caps[2]);
        return url.replacen(&caps[0], &full, 1);
    }

    url.to_string()
}

/// Best-effort download of a listing image into a size-bounded base64
/// inline form. Any failure (network, status, oversize) returns `None`;
/// the item is persisted without an inline image.
pub async fn download_inline_image(
    client: &reqwest::Client,
    url: &str,
    max_bytes: usize,
) -> Option<String> {
    let response = match client.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!("Image download failed for {}: {}", url, e);
            return None;
        }
    };

    if !response.status().is_success() {
        tracing::debug!("Image download for {} returned {}", url, response.status());
        return None;
    }

    if let Some(length) = response.content_length() {
        if length as usize > max_bytes {
            tracing::debug!("Image at {} too large ({} bytes), skipping", url, length);
            return None;
        }
    }

    let bytes = match response.bytes().await {
        Ok(b) => b,
        Err(e) => {
            tracing::debug!("Image body read failed for {}: {}", url, e);
            return None;
        }
    };

    // Content-Length can lie or be absent; enforce the bound on the body
    if bytes.len() > max_bytes {
        tracing::debug!("Image at {} too large ({} bytes), skipping", url, bytes.len());
        return None;
    }

    Some(general_purpose::STANDARD.encode(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shop_host_small_to_large() {
        assert_eq!(
            resolve_full_image_url("https://shop.example.com/img/small/coat.jpg"),
            "https://shop.example.com/img/large/coat.jpg"
        );
    }

    #[test]
    fn test_cdn_width_token_maximized() {
        assert_eq!(
            resolve_full_image_url("https://images.marketplace.example/t/abc/f140/9f2c.jpeg"),
            "https://images.marketplace.example/t/abc/f1800/9f2c.jpeg"
        );
        assert_eq!(
            resolve_full_image_url("https://images.marketplace.example/t/abc/f800/9f2c.jpeg"),
            "https://images.marketplace.example/t/abc/f1800/9f2c.jpeg"
        );
    }

    #[test]
    fn test_cdn_thumbnail_reconstructed() {
        assert_eq!(
            resolve_full_image_url(
                "https://images.marketplace.example/thumbnails/9f2c-44_thumb.jpeg"
            ),
            "https://images.marketplace.example/originals/9f2c-44.jpeg"
        );
    }

    #[test]
    fn test_unrecognized_passes_through() {
        let urls = [
            "https://cdn.other.example/full/raw.png",
            "https://images.marketplace.example/t/abc/9f2c.jpeg",
            "not even a url",
        ];
        for url in urls {
            assert_eq!(resolve_full_image_url(url), url);
        }
    }

    #[test]
    fn test_small_segment_wins_over_width_token() {
        // First matching rule applies, path segment rewrite included
        assert_eq!(
            resolve_full_image_url("https://shop.example.com/small/f140/coat.jpg"),
            "https://shop.example.com/large/f140/coat.jpg"
        );
    }
}
