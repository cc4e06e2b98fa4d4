//! Source assets: parsing scene files, lazy payload access and texture transcoding

pub mod description;
pub mod source;
pub mod gltf;
pub mod memory;
pub mod transcoder;

pub use description::{
    AlphaMode, AssetDescription, ImageBlob, MaterialDesc, MeshData, MeshGroupDesc, NodeDesc,
    PrimitiveDesc, TextureDesc,
};
pub use source::{SceneParser, SourceAsset};
pub use self::gltf::{GltfAsset, GltfParser};
pub use memory::{MemoryAsset, MemoryAssetBuilder, MemoryParser};
pub use transcoder::{
    ImageTranscoder, MipChain, MipLevel, TextureTranscoder, TranscodeTarget, TranscodedTexture,
};
