use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use raqote::SolidSource;
use serde::Deserialize;

use crate::errors::{Error, ErrorKind, Result};

/// Settings read from the optional JSON config file. Every field has a default,
/// so `{}` is a valid config.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    /// Appended to the city name before geocoding.
    pub country_suffix: String,
    pub nominatim_url: String,
    pub overpass_url: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub cache_dir: PathBuf,
    pub use_cache: bool,
    /// Keep every component instead of only the largest connected one.
    pub retain_all: bool,
    pub output_path: PathBuf,
    pub width_px: u32,
    pub height_px: u32,
    pub padding_px: u32,
    pub road_width: f32,
    pub route_width: f32,
    pub font_path: Option<PathBuf>,
    pub draw_labels: bool,
    /// Maximum number of catalog entries printed by `nodes`.
    pub list_limit: usize,
    pub theme: Theme,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            log_level: "info".to_string(),
            country_suffix: ", Algeria".to_string(),
            nominatim_url: "https://nominatim.openstreetmap.org/search".to_string(),
            overpass_url: "https://overpass-api.de/api/interpreter".to_string(),
            user_agent: concat!("dz-route-map/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 180,
            cache_dir: PathBuf::from("osm_cache"),
            use_cache: true,
            retain_all: false,
            output_path: PathBuf::from("route.png"),
            width_px: 1600,
            height_px: 1200,
            padding_px: 40,
            road_width: 1.0,
            route_width: 4.0,
            font_path: None,
            draw_labels: true,
            list_limit: 50,
            theme: Theme::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<AppConfig> {
        let file = File::open(path).map_err(|err| {
            Error::new(ErrorKind::Config, format!("Could not open config file {}: {}", path.display(), err))
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|err| {
            Error::new(ErrorKind::Config, format!("Could not parse config {}: {}", path.display(), err))
        })
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(default)]
pub struct Theme {
    #[serde(deserialize_with = "serialize_color::deserialize")]
    pub background: SolidSource,

    #[serde(deserialize_with = "serialize_color::deserialize")]
    pub road_color: SolidSource,

    #[serde(deserialize_with = "serialize_color::deserialize")]
    pub route_color: SolidSource,

    #[serde(deserialize_with = "serialize_color::deserialize")]
    pub endpoint_color: SolidSource,

    #[serde(deserialize_with = "serialize_color::deserialize")]
    pub text_color: SolidSource,
}

impl Default for Theme {
    fn default() -> Self {
        Theme {
            background: SolidSource::from_unpremultiplied_argb(0xff, 0x11, 0x11, 0x11),
            road_color: SolidSource::from_unpremultiplied_argb(0xff, 0x99, 0x99, 0x99),
            route_color: SolidSource::from_unpremultiplied_argb(0xff, 0x00, 0x80, 0x00),
            endpoint_color: SolidSource::from_unpremultiplied_argb(0xff, 0xff, 0xff, 0xff),
            text_color: SolidSource::from_unpremultiplied_argb(0xff, 0xff, 0xff, 0xff),
        }
    }
}

mod serialize_color {
    use raqote::SolidSource;
    use serde::{de, Deserializer};
    use serde::de::Visitor;

    struct ColorVisitor;

    impl<'de> Visitor<'de> for ColorVisitor {
        type Value = SolidSource;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(formatter, "a colour string like '#rrggbb' or '#rrggbbaa'")
        }

        fn visit_str<E>(self, string: &str) -> Result<Self::Value, E> where E: de::Error {
            if !string.starts_with('#') || !(string.len() == 7 || string.len() == 9) || !string.is_ascii() {
                return Err(de::Error::invalid_value(de::Unexpected::Str(string), &self))
            }
            let r = parse_hex_byte(&self, &string[1..3])?;
            let g = parse_hex_byte(&self, &string[3..5])?;
            let b = parse_hex_byte(&self, &string[5..7])?;
            let a = if string.len() == 9 {
                parse_hex_byte(&self, &string[7..9])?
            } else {
                0xff
            };
            Ok(SolidSource::from_unpremultiplied_argb(a, r, g, b))
        }
    }

    fn parse_hex_byte<E>(visitor: &ColorVisitor, string: &str) -> Result<u8, E> where E: de::Error {
        u8::from_str_radix(string, 16).map_err(|_| {
            de::Error::invalid_value(de::Unexpected::Str(string), visitor)
        })
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SolidSource, D::Error>
        where D: Deserializer<'de> {
        deserializer.deserialize_str(ColorVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.country_suffix, ", Algeria");
        assert_eq!(config.width_px, 1600);
        assert!(!config.retain_all);
        assert_eq!(config.theme.route_color.g, 0x80);
    }

    #[test]
    fn test_theme_colors() {
        let config: AppConfig = serde_json::from_str(
            r##"{"width_px": 800, "theme": {"route_color": "#ff000080", "road_color": "#00ff00"}}"##,
        ).unwrap();
        assert_eq!(config.width_px, 800);
        assert_eq!(config.theme.road_color.g, 0xff);
        assert_eq!(config.theme.road_color.a, 0xff);
        assert_eq!(config.theme.route_color.a, 0x80);
        // premultiplied
        assert_eq!(config.theme.route_color.r, 0x80);
        assert_eq!(config.theme.background.r, 0x11);
    }

    #[test]
    fn test_invalid_color_is_rejected() {
        let result: std::result::Result<AppConfig, _> =
            serde_json::from_str(r##"{"theme": {"road_color": "green"}}"##);
        assert!(result.is_err());
    }
}
