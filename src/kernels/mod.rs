pub mod tiled;

pub use tiled::{BlockSize, GemmShape, TiledMatMul};
