//! Texture transcoding: encoded image bytes to GPU-uploadable mip chains

use image::imageops::FilterType;
use image::RgbaImage;

use crate::core::error::AssetLoadError;
use crate::gpu::TextureFormat;

/// What the decoded texture will be used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranscodeTarget {
    /// sRGB color; an opacity mask is split out only if alpha is actually used
    Color,
    /// sRGB color with an opacity mask always split out
    ColorWithOpacity,
    /// Tangent-space normal map, two channels
    Normal,
    /// Linear data such as packed roughness/metalness
    Linear,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MipLevel {
    pub extent: [u32; 2],
    pub data: Vec<u8>,
}

/// All mip levels of one image, largest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MipChain {
    pub format: TextureFormat,
    pub levels: Vec<MipLevel>,
}

impl MipChain {
    pub fn extent(&self) -> [u32; 2] {
        self.levels.first().map(|l| l.extent).unwrap_or([0, 0])
    }

    pub fn byte_size(&self) -> u64 {
        self.levels.iter().map(|l| l.data.len() as u64).sum()
    }
}

/// Result of a decode: the primary image and optionally a secondary opacity mask.
#[derive(Clone, Debug)]
pub struct TranscodedTexture {
    pub primary: MipChain,
    pub opacity: Option<MipChain>,
}

pub trait TextureTranscoder: Send + Sync {
    fn decode(&self, bytes: &[u8], target: TranscodeTarget) -> Result<TranscodedTexture, AssetLoadError>;
}

/// Transcoder built on the `image` crate. Produces uncompressed formats only.
#[derive(Clone, Debug)]
pub struct ImageTranscoder {
    pub generate_mips: bool,
}

impl Default for ImageTranscoder {
    fn default() -> Self {
        Self { generate_mips: true }
    }
}

impl ImageTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Halve each level with a triangle (bilinear) filter down to 1x1.
    fn build_levels(&self, base: RgbaImage) -> Vec<RgbaImage> {
        let mut levels = vec![base];
        if !self.generate_mips {
            return levels;
        }
        loop {
            let (w, h) = levels[levels.len() - 1].dimensions();
            if w <= 1 && h <= 1 {
                break;
            }
            let next = image::imageops::resize(
                &levels[levels.len() - 1],
                (w / 2).max(1),
                (h / 2).max(1),
                FilterType::Triangle,
            );
            levels.push(next);
        }
        levels
    }
}

fn chain(levels: &[RgbaImage], format: TextureFormat, texel: impl Fn(&image::Rgba<u8>, &mut Vec<u8>)) -> MipChain {
    MipChain {
        format,
        levels: levels
            .iter()
            .map(|img| {
                let mut data = Vec::with_capacity(format.level_size([img.width(), img.height()]) as usize);
                for px in img.pixels() {
                    texel(px, &mut data);
                }
                MipLevel { extent: [img.width(), img.height()], data }
            })
            .collect(),
    }
}

impl TextureTranscoder for ImageTranscoder {
    fn decode(&self, bytes: &[u8], target: TranscodeTarget) -> Result<TranscodedTexture, AssetLoadError> {
        let rgba = image::load_from_memory(bytes)
            .map_err(|e| AssetLoadError::Decode(e.to_string()))?
            .to_rgba8();
        if rgba.width() == 0 || rgba.height() == 0 {
            return Err(AssetLoadError::Decode("image has zero extent".into()));
        }

        let uses_alpha = rgba.pixels().any(|px| px.0[3] < 255);
        let levels = self.build_levels(rgba);

        let rgba_texel = |px: &image::Rgba<u8>, out: &mut Vec<u8>| out.extend_from_slice(&px.0);
        let primary = match target {
            TranscodeTarget::Color | TranscodeTarget::ColorWithOpacity => {
                chain(&levels, TextureFormat::Rgba8Srgb, rgba_texel)
            }
            TranscodeTarget::Linear => chain(&levels, TextureFormat::Rgba8Unorm, rgba_texel),
            TranscodeTarget::Normal => chain(&levels, TextureFormat::Rg8Unorm, |px, out| {
                out.extend_from_slice(&px.0[..2])
            }),
        };

        let wants_opacity = match target {
            TranscodeTarget::ColorWithOpacity => true,
            TranscodeTarget::Color => uses_alpha,
            _ => false,
        };
        let opacity = wants_opacity.then(|| {
            chain(&levels, TextureFormat::R8Unorm, |px, out| out.push(px.0[3]))
        });

        Ok(TranscodedTexture { primary, opacity })
    }
}
