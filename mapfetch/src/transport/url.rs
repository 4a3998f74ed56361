//! Tile URL construction.
//!
//! Three kinds of tileset id are understood:
//!
//! | Tileset id                     | URL                                                        |
//! |--------------------------------|------------------------------------------------------------|
//! | `https://host/{z}/{x}/{y}.png` | the template with placeholders filled in                   |
//! | `mapbox://styles/<user>/<id>`  | `https://api.mapbox.com/styles/v1/<user>/<id>/tiles/256/…` |
//! | anything else (`mapbox.satellite`) | `https://api.mapbox.com/v4/<id>/{z}/{x}/{y}.png`       |
//!
//! Retina requests use the `@2x` variant. For the Mapbox forms the access
//! token, when configured, is appended as a query parameter.

use super::types::TransportError;
use crate::coord::CanonicalTileId;

const MAPBOX_API_BASE: &str = "https://api.mapbox.com";
const STYLE_PREFIX: &str = "mapbox://styles/";
const RETINA_PLACEHOLDER: &str = "{@2x}";

/// Builds request URLs for tilesets.
#[derive(Debug, Clone, Default)]
pub struct TileUrl {
    access_token: Option<String>,
}

impl TileUrl {
    pub fn new(access_token: Option<String>) -> Self {
        Self {
            access_token: access_token.filter(|t| !t.is_empty()),
        }
    }

    /// URL for a tile of `tileset`.
    pub fn build(
        &self,
        tileset: &str,
        tile: &CanonicalTileId,
        use_retina: bool,
    ) -> Result<String, TransportError> {
        if tileset.is_empty() {
            return Err(TransportError::InvalidUrl("empty tileset id".to_string()));
        }

        if tileset.starts_with("http") {
            return fill_template(tileset, tile, use_retina);
        }

        let template = match tileset.strip_prefix(STYLE_PREFIX) {
            Some(style) => {
                let mut parts = style.split('/').filter(|p| !p.is_empty());
                let (Some(user), Some(id), None) = (parts.next(), parts.next(), parts.next())
                else {
                    return Err(TransportError::InvalidUrl(format!(
                        "expected mapbox://styles/<user>/<style>, got {}",
                        tileset
                    )));
                };
                format!(
                    "{}/styles/v1/{}/{}/tiles/256/{{z}}/{{x}}/{{y}}{}",
                    MAPBOX_API_BASE, user, id, RETINA_PLACEHOLDER
                )
            }
            None => format!(
                "{}/v4/{}/{{z}}/{{x}}/{{y}}{}.png",
                MAPBOX_API_BASE, tileset, RETINA_PLACEHOLDER
            ),
        };

        let mut url = fill_template(&template, tile, use_retina)?;
        if let Some(token) = &self.access_token {
            url.push_str("?access_token=");
            url.push_str(token);
        }
        Ok(url)
    }
}

fn fill_template(
    template: &str,
    tile: &CanonicalTileId,
    use_retina: bool,
) -> Result<String, TransportError> {
    if !(template.contains("{z}") && template.contains("{x}") && template.contains("{y}")) {
        return Err(TransportError::InvalidUrl(format!(
            "template needs {{z}}, {{x}} and {{y}}: {}",
            template
        )));
    }
    Ok(template
        .replace("{z}", &tile.zoom.to_string())
        .replace("{x}", &tile.x.to_string())
        .replace("{y}", &tile.y.to_string())
        .replace(RETINA_PLACEHOLDER, if use_retina { "@2x" } else { "" }))
}
