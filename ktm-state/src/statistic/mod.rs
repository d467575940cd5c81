pub mod container;
pub mod image_pull;
pub mod pod;

pub use container::{
    ContainerStatistic,
    InitContainerStatistic,
    NonInitContainerStatistic,
};
pub use image_pull::{
    ContainerImagePullStatistic,
    ImagePullStatistics,
    PodImagePullStatistic,
};
pub use pod::{
    PodStatistic,
    PodStatistics,
};
