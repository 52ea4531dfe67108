use burn::nn::conv::{Conv1d, Conv1dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::{log_softmax, relu};
use burn::tensor::TensorData;

/// Configuration for the PointNet part-segmentation network.
///
/// ```text
/// (batch, 3, points)
///   → T-net(3) → shared MLP 3→64
///   → [T-net(64) if feature_transform] → point features (64)
///   → shared MLP 64→128→1024 → max-pool → global feature (1024)
///   → concat(global repeated per point, point features) (1088)
///   → shared MLP 1088→512→256→128→num_classes → log-softmax
///   → (batch, points, num_classes)
/// ```
#[derive(Config, Debug)]
pub struct PointNetSegConfig {
    /// Number of part classes (output width).
    pub num_classes: usize,
    /// Learn a transform of the 64-d point features as well.
    #[config(default = false)]
    pub feature_transform: bool,
    /// Divide every hidden width by this factor. 1 gives the standard network.
    #[config(default = 1)]
    pub width_divisor: usize,
}

impl PointNetSegConfig {
    fn width(&self, n: usize) -> usize {
        (n / self.width_divisor.max(1)).max(1)
    }

    /// Width of the per-point features the feature transform acts on.
    pub fn point_feature_dim(&self) -> usize {
        self.width(64)
    }

    /// Initialize a network with freshly drawn parameters.
    pub fn init<B: Backend>(&self, device: &B::Device) -> PointNetSeg<B> {
        let feat = self.point_feature_dim();
        let global = self.width(1024);
        PointNetSeg {
            input_transform: TransformNet::new(3, self, device),
            conv1: Conv1dConfig::new(3, feat, 1).init(device),
            bn1: BatchNormConfig::new(feat).init(device),
            feature_transform: self
                .feature_transform
                .then(|| TransformNet::new(feat, self, device)),
            conv2: Conv1dConfig::new(feat, self.width(128), 1).init(device),
            bn2: BatchNormConfig::new(self.width(128)).init(device),
            conv3: Conv1dConfig::new(self.width(128), global, 1).init(device),
            bn3: BatchNormConfig::new(global).init(device),
            head1: Conv1dConfig::new(global + feat, self.width(512), 1).init(device),
            head_bn1: BatchNormConfig::new(self.width(512)).init(device),
            head2: Conv1dConfig::new(self.width(512), self.width(256), 1).init(device),
            head_bn2: BatchNormConfig::new(self.width(256)).init(device),
            head3: Conv1dConfig::new(self.width(256), self.width(128), 1).init(device),
            head_bn3: BatchNormConfig::new(self.width(128)).init(device),
            head4: Conv1dConfig::new(self.width(128), self.num_classes, 1).init(device),
        }
    }
}

/// Output of one forward pass.
#[derive(Debug, Clone)]
pub struct SegOutput<B: Backend> {
    /// Per-point class log-probabilities, `(batch, points, num_classes)`.
    pub log_probs: Tensor<B, 3>,
    /// Input transform, `(batch, 3, 3)`.
    pub trans: Tensor<B, 3>,
    /// Feature transform, `(batch, d, d)`, when enabled.
    pub trans_feat: Option<Tensor<B, 3>>,
}

/// Regresses a `k × k` alignment matrix from a `(batch, k, points)` input.
#[derive(Module, Debug)]
pub struct TransformNet<B: Backend> {
    conv1: Conv1d<B>,
    conv2: Conv1d<B>,
    conv3: Conv1d<B>,
    fc1: Linear<B>,
    fc2: Linear<B>,
    fc3: Linear<B>,
    bn1: BatchNorm<B, 1>,
    bn2: BatchNorm<B, 1>,
    bn3: BatchNorm<B, 1>,
    bn4: BatchNorm<B, 1>,
    bn5: BatchNorm<B, 1>,
}

impl<B: Backend> TransformNet<B> {
    fn new(k: usize, config: &PointNetSegConfig, device: &B::Device) -> Self {
        let (c1, c2, c3) = (config.width(64), config.width(128), config.width(1024));
        let (f1, f2) = (config.width(512), config.width(256));
        Self {
            conv1: Conv1dConfig::new(k, c1, 1).init(device),
            conv2: Conv1dConfig::new(c1, c2, 1).init(device),
            conv3: Conv1dConfig::new(c2, c3, 1).init(device),
            fc1: LinearConfig::new(c3, f1).init(device),
            fc2: LinearConfig::new(f1, f2).init(device),
            fc3: LinearConfig::new(f2, k * k).init(device),
            bn1: BatchNormConfig::new(c1).init(device),
            bn2: BatchNormConfig::new(c2).init(device),
            bn3: BatchNormConfig::new(c3).init(device),
            bn4: BatchNormConfig::new(f1).init(device),
            bn5: BatchNormConfig::new(f2).init(device),
        }
    }

    /// Input `(batch, k, points)`, output `(batch, k, k)`.
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, k, _] = x.dims();
        let device = x.device();

        let x = relu(self.bn1.forward(self.conv1.forward(x)));
        let x = relu(self.bn2.forward(self.conv2.forward(x)));
        let x = relu(self.bn3.forward(self.conv3.forward(x)));
        let channels = x.dims()[1];
        let x: Tensor<B, 2> = x.max_dim(2).reshape([batch, channels]);

        let x = relu(dense_norm(&self.bn4, self.fc1.forward(x)));
        let x = relu(dense_norm(&self.bn5, self.fc2.forward(x)));
        let x = self.fc3.forward(x).reshape([batch, k, k]);

        // Regress a residual around the identity.
        x + identity_batch::<B>(batch, k, &device)
    }
}

/// Batch-norm over `(batch, features)` activations.
fn dense_norm<B: Backend>(bn: &BatchNorm<B, 1>, x: Tensor<B, 2>) -> Tensor<B, 2> {
    let [batch, features] = x.dims();
    bn.forward(x.reshape([batch, features, 1]))
        .reshape([batch, features])
}

/// `batch` stacked `k × k` identity matrices.
pub fn identity_batch<B: Backend>(batch: usize, k: usize, device: &B::Device) -> Tensor<B, 3> {
    let values: Vec<f32> = (0..batch * k * k)
        .map(|i| if (i % (k * k)) % (k + 1) == 0 { 1.0 } else { 0.0 })
        .collect();
    Tensor::from_data(TensorData::new(values, [batch, k, k]), device)
}

/// Apply a per-shape transform to channel-first features:
/// `(batch, k, points)` × `(batch, k, k)` → `(batch, k, points)`.
fn apply_transform<B: Backend>(x: Tensor<B, 3>, trans: Tensor<B, 3>) -> Tensor<B, 3> {
    x.swap_dims(1, 2).matmul(trans).swap_dims(1, 2)
}

/// PointNet segmentation network.
#[derive(Module, Debug)]
pub struct PointNetSeg<B: Backend> {
    input_transform: TransformNet<B>,
    conv1: Conv1d<B>,
    bn1: BatchNorm<B, 1>,
    feature_transform: Option<TransformNet<B>>,
    conv2: Conv1d<B>,
    bn2: BatchNorm<B, 1>,
    conv3: Conv1d<B>,
    bn3: BatchNorm<B, 1>,
    head1: Conv1d<B>,
    head_bn1: BatchNorm<B, 1>,
    head2: Conv1d<B>,
    head_bn2: BatchNorm<B, 1>,
    head3: Conv1d<B>,
    head_bn3: BatchNorm<B, 1>,
    head4: Conv1d<B>,
}

impl<B: Backend> PointNetSeg<B> {
    /// Forward pass.
    ///
    /// Input: channel-first points `(batch, 3, points)`.
    pub fn forward(&self, points: Tensor<B, 3>) -> SegOutput<B> {
        let npoints = points.dims()[2];

        let trans = self.input_transform.forward(points.clone());
        let x = apply_transform(points, trans.clone());
        let x = relu(self.bn1.forward(self.conv1.forward(x)));

        let (x, trans_feat) = match &self.feature_transform {
            Some(tnet) => {
                let t = tnet.forward(x.clone());
                (apply_transform(x, t.clone()), Some(t))
            }
            None => (x, None),
        };
        let point_features = x.clone();

        let x = relu(self.bn2.forward(self.conv2.forward(x)));
        let x = self.bn3.forward(self.conv3.forward(x));
        let global = x.max_dim(2).repeat_dim(2, npoints);

        let x = Tensor::cat(vec![global, point_features], 1);
        let x = relu(self.head_bn1.forward(self.head1.forward(x)));
        let x = relu(self.head_bn2.forward(self.head2.forward(x)));
        let x = relu(self.head_bn3.forward(self.head3.forward(x)));
        let logits = self.head4.forward(x).swap_dims(1, 2);

        SegOutput {
            log_probs: log_softmax(logits, 2),
            trans,
            trans_feat,
        }
    }

    /// Whether the network carries a feature transform.
    pub fn has_feature_transform(&self) -> bool {
        self.feature_transform.is_some()
    }
}
