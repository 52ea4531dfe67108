//! PointNet part-segmentation network: input/feature transform nets, shared
//! per-point MLPs, global max-pool, and the dense per-point head.

pub mod pointnet;

pub use pointnet::{
    identity_batch, PointNetSeg, PointNetSegConfig, PointNetSegRecord, SegOutput, TransformNet,
};
