mod dense;
mod feature_transform;
mod layer;
mod lhuc;
mod softmax;

pub use dense::Dense;
pub use feature_transform::FeatureTransform;
pub use layer::Layer;
pub use lhuc::Lhuc;
pub use softmax::Softmax;
