pub mod config;
pub mod image;
pub mod job;

pub use config::Settings;
pub use image::{LocalImage, RepositoryPage, TagDetails};
pub use job::{
    FailurePolicy, Job, JobKind, JobStatus, LocalPushRequest, MirrorRequest, RemotePrefixRequest,
    RepositoryDeleteRequest,
};
