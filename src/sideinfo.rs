//! The `SideInfo` record: the only artifact persisted across embed and
//! extract. Parsing is manual (rather than a derived `Deserialize`) so that
//! a malformed field produces a reason string naming the offending key,
//! instead of an opaque deserialization failure.

use crate::error::WatermarkError;
use base64::Engine;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// `wm_params` sub-object: the parameters that MUST match between embed and
/// extract.
#[derive(Debug, Clone, Serialize)]
pub struct WmParams {
    pub alpha: f64,
    pub wavelet: String,
    pub channels: String,
}

/// A `{R, G, B}`-keyed triple, used for both `ll_shapes` and `host_S`.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelTriple<T> {
    #[serde(rename = "R")]
    pub r: T,
    #[serde(rename = "G")]
    pub g: T,
    #[serde(rename = "B")]
    pub b: T,
}

impl<T> ChannelTriple<T> {
    pub fn new(r: T, g: T, b: T) -> Self {
        Self { r, g, b }
    }
}

/// Exactly one of `image_base64` or `path` is present. Modeled as a
/// discriminated sum rather than an "optional-optional" struct so invalid
/// states (both set, neither set) are unrepresentable.
#[derive(Debug, Clone)]
pub enum WatermarkRef {
    ImageBase64(String),
    Path(String),
}

impl Serialize for WatermarkRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            WatermarkRef::ImageBase64(b64) => map.serialize_entry("image_base64", b64)?,
            WatermarkRef::Path(path) => map.serialize_entry("path", path)?,
        }
        map.end()
    }
}

/// The full SideInfo record.
#[derive(Debug, Clone, Serialize)]
pub struct SideInfo {
    pub wm_params: WmParams,
    /// Always `[width, height]`.
    pub canonical_size: [u32; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    pub ll_shapes: ChannelTriple<[usize; 2]>,
    #[serde(rename = "host_S")]
    pub host_s: ChannelTriple<Vec<f64>>,
    pub watermark_ref: WatermarkRef,
}

impl SideInfo {
    pub fn to_json(&self) -> Result<String, WatermarkError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a SideInfo record from raw JSON text, validating fields the
    /// same way the original service's explicit key lookups do. On failure
    /// returns a human-readable reason (used to build `skip_bad_meta`).
    pub fn parse(text: &str) -> Result<SideInfo, String> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| format!("unreadable side-info: {e}"))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<SideInfo, String> {
        let wm_params_v = require(value, "wm_params")?;
        let alpha = require(wm_params_v, "alpha")?
            .as_f64()
            .ok_or_else(|| "invalid wm_params.alpha: expected a number".to_string())?;
        let wavelet = require(wm_params_v, "wavelet")?
            .as_str()
            .ok_or_else(|| "invalid wm_params.wavelet: expected a string".to_string())?
            .to_string();
        let channels = require(wm_params_v, "channels")?
            .as_str()
            .ok_or_else(|| "invalid wm_params.channels: expected a string".to_string())?
            .to_string();

        let canonical_size = require(value, "canonical_size")?
            .as_array()
            .filter(|a| a.len() == 2)
            .and_then(|a| Some([a[0].as_u64()? as u32, a[1].as_u64()? as u32]))
            .ok_or_else(|| "invalid canonical_size: expected [W, H]".to_string())?;

        let output_path = value
            .get("output_path")
            .and_then(Value::as_str)
            .map(str::to_string);

        let ll_shapes_v = require(value, "ll_shapes")?;
        let ll_shapes = ChannelTriple::new(
            parse_shape(ll_shapes_v, "R")?,
            parse_shape(ll_shapes_v, "G")?,
            parse_shape(ll_shapes_v, "B")?,
        );

        let host_s_v = require(value, "host_S")?;
        let host_s = ChannelTriple::new(
            parse_float_seq(host_s_v, "R")?,
            parse_float_seq(host_s_v, "G")?,
            parse_float_seq(host_s_v, "B")?,
        );

        let wm_ref_v = require(value, "watermark_ref")?;
        let watermark_ref = if let Some(b64) = wm_ref_v.get("image_base64").and_then(Value::as_str)
        {
            WatermarkRef::ImageBase64(b64.to_string())
        } else if let Some(path) = wm_ref_v.get("path").and_then(Value::as_str) {
            if path == "base64_data" {
                return Err(
                    "watermark_ref.path is the rejected \"base64_data\" sentinel".to_string(),
                );
            }
            WatermarkRef::Path(path.to_string())
        } else {
            return Err(
                "missing watermark reference (path or image_base64)".to_string(),
            );
        };

        Ok(SideInfo {
            wm_params: WmParams {
                alpha,
                wavelet,
                channels,
            },
            canonical_size,
            output_path,
            ll_shapes,
            host_s,
            watermark_ref,
        })
    }
}

fn require<'a>(value: &'a Value, key: &str) -> Result<&'a Value, String> {
    value.get(key).ok_or_else(|| format!("missing key '{key}'"))
}

fn parse_shape(parent: &Value, key: &str) -> Result<[usize; 2], String> {
    require(parent, key)?
        .as_array()
        .filter(|a| a.len() == 2)
        .and_then(|a| Some([a[0].as_u64()? as usize, a[1].as_u64()? as usize]))
        .ok_or_else(|| format!("invalid ll_shapes.{key}: expected [h, w]"))
}

fn parse_float_seq(parent: &Value, key: &str) -> Result<Vec<f64>, String> {
    require(parent, key)?
        .as_array()
        .ok_or_else(|| format!("invalid host_S.{key}: expected an array"))?
        .iter()
        .map(|v| v.as_f64().ok_or_else(|| format!("invalid host_S.{key}: non-numeric entry")))
        .collect()
}

/// Decodes a possibly data-URL-prefixed base64 payload into image bytes.
pub fn decode_base64_image(data: &str) -> Result<Vec<u8>, WatermarkError> {
    let raw = match data.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    Ok(base64::engine::general_purpose::STANDARD.decode(raw)?)
}

/// Encodes image bytes as a bare (no data-URL prefix) base64 string.
pub fn encode_base64_image(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
