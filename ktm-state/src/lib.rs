pub mod eventloop;
pub mod output;
pub mod statistic;

pub use eventloop::{
    EventLoop,
    Generation,
    image_pull::ImagePullEventLoop,
    pod::PodEventLoop,
};
pub use output::{
    MultiSink,
    RecordSink,
};
pub use statistic::{
    ContainerImagePullStatistic,
    ContainerStatistic,
    ImagePullStatistics,
    InitContainerStatistic,
    NonInitContainerStatistic,
    PodImagePullStatistic,
    PodStatistic,
    PodStatistics,
};
