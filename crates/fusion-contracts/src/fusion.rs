use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MIN_IMAGES: usize = 2;
pub const MAX_IMAGES: usize = 4;
pub const GENERIC_FAILURE_MESSAGE: &str = "Fusion failed, please try again later";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FusionMode {
    #[default]
    Blend,
    Merge,
    Combine,
}

impl FusionMode {
    pub const ALL: [FusionMode; 3] = [FusionMode::Blend, FusionMode::Merge, FusionMode::Combine];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blend => "blend",
            Self::Merge => "merge",
            Self::Combine => "combine",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Blend => "Blend",
            Self::Merge => "Merge",
            Self::Combine => "Combine",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Blend => "Smoothly blend several images",
            Self::Merge => "Keep more detail from each image",
            Self::Combine => "Creative combination",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Wide,
    #[serde(rename = "9:16")]
    Tall,
    #[serde(rename = "3:2")]
    Landscape,
    #[serde(rename = "2:3")]
    Portrait,
    #[serde(rename = "4:3")]
    Standard,
    #[serde(rename = "3:4")]
    StandardPortrait,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 7] = [
        AspectRatio::Square,
        AspectRatio::Wide,
        AspectRatio::Tall,
        AspectRatio::Landscape,
        AspectRatio::Portrait,
        AspectRatio::Standard,
        AspectRatio::StandardPortrait,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Wide => "16:9",
            Self::Tall => "9:16",
            Self::Landscape => "3:2",
            Self::Portrait => "2:3",
            Self::Standard => "4:3",
            Self::StandardPortrait => "3:4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Resolution {
    #[serde(rename = "1k")]
    OneK,
    #[default]
    #[serde(rename = "2k")]
    TwoK,
    #[serde(rename = "4k")]
    FourK,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [Resolution::OneK, Resolution::TwoK, Resolution::FourK];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneK => "1k",
            Self::TwoK => "2k",
            Self::FourK => "4k",
        }
    }
}

macro_rules! str_enum_traits {
    ($ty:ident, $what:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                let normalized = raw.trim().to_ascii_lowercase();
                $ty::ALL
                    .into_iter()
                    .find(|value| value.as_str() == normalized)
                    .ok_or_else(|| {
                        let allowed = $ty::ALL.map(|value| value.as_str()).join(", ");
                        format!("unknown {} '{}' (expected one of: {allowed})", $what, raw.trim())
                    })
            }
        }
    };
}

str_enum_traits!(FusionMode, "fusion mode");
str_enum_traits!(AspectRatio, "aspect ratio");
str_enum_traits!(Resolution, "resolution");

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FusionParameters {
    pub prompt: Option<String>,
    pub mode: FusionMode,
    pub aspect_ratio: AspectRatio,
    pub resolution: Resolution,
}

impl FusionParameters {
    /// "2:3 • 4K" style line shown next to a result.
    pub fn summary(&self) -> String {
        format!(
            "{} • {}",
            self.aspect_ratio,
            self.resolution.as_str().to_ascii_uppercase()
        )
    }
}

/// Body sent to the fusion provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionRequest {
    pub images: Vec<String>,
    pub prompt: String,
    pub mode: FusionMode,
    pub aspect_ratio: AspectRatio,
    pub resolution: Resolution,
}

/// Assembles the provider request. Callers guarantee
/// `MIN_IMAGES..=MAX_IMAGES` images; order is preserved as given.
pub fn build(images: Vec<String>, params: &FusionParameters) -> FusionRequest {
    FusionRequest {
        images,
        prompt: params
            .prompt
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string(),
        mode: params.mode,
        aspect_ratio: params.aspect_ratio,
        resolution: params.resolution,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FusionResult {
    Success { image_url: String },
    Failure { message: String },
}

/// Raw shape returned by the fusion provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FusionResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, rename = "imageUrl")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl FusionResponse {
    pub fn into_result(self) -> FusionResult {
        let image_url = self
            .image_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        match (self.success, image_url) {
            (true, Some(image_url)) => FusionResult::Success { image_url },
            (true, None) => FusionResult::Failure {
                message: "Fusion provider returned no image".to_string(),
            },
            (false, _) => FusionResult::Failure {
                message: self
                    .error
                    .as_ref()
                    .and_then(error_text)
                    .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string()),
            },
        }
    }
}

fn error_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(|text| text.trim().to_string())?,
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
