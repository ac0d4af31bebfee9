pub mod dims;
pub mod image;
pub mod layout;
pub mod tensor;
pub mod tensor_desc;

pub use dims::Dims;
pub use image::{Image, PixelFormat};
pub use layout::{DataType, Layout};
pub use tensor::{Tensor, TensorStorage};
pub use tensor_desc::TensorDesc;
