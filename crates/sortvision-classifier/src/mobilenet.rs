//! MobileNetV3-Small backbone with a replaceable classification head
//!
//! Layer layout and parameter names follow torchvision's `mobilenet_v3_small`
//! so a fine-tuned PyTorch `state_dict` loads without renaming:
//!
//! - `features.0`: stem conv 3→16, stride 2, Hardswish
//! - `features.1..=11`: inverted residual blocks (`features.N.block.M`)
//! - `features.12`: 1x1 conv 96→576, Hardswish
//! - `classifier.0`: linear 576→1024, Hardswish, dropout (identity at inference)
//! - `classifier.3`: linear 1024→num_classes

use candle_core::{Module, ModuleT, Result, Tensor, D};
use candle_nn::{batch_norm, conv2d, conv2d_no_bias, linear, BatchNorm, Conv2d, Conv2dConfig, Linear, VarBuilder};

/// Width of the penultimate layer feeding the classification head
pub const HEAD_IN_FEATURES: usize = 1024;

/// Parameter name of the classification head weight
pub const HEAD_WEIGHT: &str = "classifier.3.weight";

/// Parameter name of the classification head bias
pub const HEAD_BIAS: &str = "classifier.3.bias";

const STEM_CHANNELS: usize = 16;
const LAST_CONV_CHANNELS: usize = 576;
const BN_EPS: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activation {
    Relu,
    Hardswish,
}

impl Activation {
    fn apply(self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Self::Relu => xs.relu(),
            Self::Hardswish => xs.mul(&hard_sigmoid(xs)?),
        }
    }
}

/// relu6(x + 3) / 6
fn hard_sigmoid(xs: &Tensor) -> Result<Tensor> {
    xs.affine(1.0, 3.0)?.clamp(0f32, 6f32)?.affine(1.0 / 6.0, 0.0)
}

/// Inverted residual block configuration
struct BlockSpec {
    input: usize,
    kernel: usize,
    expanded: usize,
    output: usize,
    use_se: bool,
    activation: Activation,
    stride: usize,
}

const fn block(
    input: usize,
    kernel: usize,
    expanded: usize,
    output: usize,
    use_se: bool,
    activation: Activation,
    stride: usize,
) -> BlockSpec {
    BlockSpec {
        input,
        kernel,
        expanded,
        output,
        use_se,
        activation,
        stride,
    }
}

const BLOCKS: [BlockSpec; 11] = [
    block(16, 3, 16, 16, true, Activation::Relu, 2),
    block(16, 3, 72, 24, false, Activation::Relu, 2),
    block(24, 3, 88, 24, false, Activation::Relu, 1),
    block(24, 5, 96, 40, true, Activation::Hardswish, 2),
    block(40, 5, 240, 40, true, Activation::Hardswish, 1),
    block(40, 5, 240, 40, true, Activation::Hardswish, 1),
    block(40, 5, 120, 48, true, Activation::Hardswish, 1),
    block(48, 5, 144, 48, true, Activation::Hardswish, 1),
    block(48, 5, 288, 96, true, Activation::Hardswish, 2),
    block(96, 5, 576, 96, true, Activation::Hardswish, 1),
    block(96, 5, 576, 96, true, Activation::Hardswish, 1),
];

/// Round channel counts the same way torchvision's `_make_divisible` does
fn make_divisible(value: usize, divisor: usize) -> usize {
    let rounded = ((value + divisor / 2) / divisor * divisor).max(divisor);
    // never round down by more than 10%
    if rounded * 10 < value * 9 {
        rounded + divisor
    } else {
        rounded
    }
}

/// Conv2d + BatchNorm + optional activation (`Conv2dNormActivation`)
struct ConvBnAct {
    conv: Conv2d,
    bn: BatchNorm,
    activation: Option<Activation>,
}

impl ConvBnAct {
    #[allow(clippy::too_many_arguments)]
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        groups: usize,
        activation: Option<Activation>,
        vb: VarBuilder,
    ) -> Result<Self> {
        let cfg = Conv2dConfig {
            padding: (kernel - 1) / 2,
            stride,
            groups,
            ..Default::default()
        };
        let conv = conv2d_no_bias(in_channels, out_channels, kernel, cfg, vb.pp("0"))?;
        let bn = batch_norm(out_channels, BN_EPS, vb.pp("1"))?;
        Ok(Self {
            conv,
            bn,
            activation,
        })
    }
}

impl Module for ConvBnAct {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.conv.forward(xs)?;
        let xs = self.bn.forward_t(&xs, false)?;
        match self.activation {
            Some(act) => act.apply(&xs),
            None => Ok(xs),
        }
    }
}

struct SqueezeExcitation {
    fc1: Conv2d,
    fc2: Conv2d,
}

impl SqueezeExcitation {
    fn new(channels: usize, squeeze: usize, vb: VarBuilder) -> Result<Self> {
        let cfg = Conv2dConfig::default();
        let fc1 = conv2d(channels, squeeze, 1, cfg, vb.pp("fc1"))?;
        let fc2 = conv2d(squeeze, channels, 1, cfg, vb.pp("fc2"))?;
        Ok(Self { fc1, fc2 })
    }
}

impl Module for SqueezeExcitation {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let scale = xs.mean_keepdim(D::Minus1)?.mean_keepdim(D::Minus2)?;
        let scale = self.fc1.forward(&scale)?.relu()?;
        let scale = hard_sigmoid(&self.fc2.forward(&scale)?)?;
        xs.broadcast_mul(&scale)
    }
}

struct InvertedResidual {
    expand: Option<ConvBnAct>,
    depthwise: ConvBnAct,
    se: Option<SqueezeExcitation>,
    project: ConvBnAct,
    residual: bool,
}

impl InvertedResidual {
    fn new(spec: &BlockSpec, vb: VarBuilder) -> Result<Self> {
        let vb = vb.pp("block");
        let mut index = 0;

        let expand = if spec.expanded != spec.input {
            let layer = ConvBnAct::new(
                spec.input,
                spec.expanded,
                1,
                1,
                1,
                Some(spec.activation),
                vb.pp(index.to_string()),
            )?;
            index += 1;
            Some(layer)
        } else {
            None
        };

        let depthwise = ConvBnAct::new(
            spec.expanded,
            spec.expanded,
            spec.kernel,
            spec.stride,
            spec.expanded,
            Some(spec.activation),
            vb.pp(index.to_string()),
        )?;
        index += 1;

        let se = if spec.use_se {
            let squeeze = make_divisible(spec.expanded / 4, 8);
            let layer = SqueezeExcitation::new(spec.expanded, squeeze, vb.pp(index.to_string()))?;
            index += 1;
            Some(layer)
        } else {
            None
        };

        let project = ConvBnAct::new(
            spec.expanded,
            spec.output,
            1,
            1,
            1,
            None,
            vb.pp(index.to_string()),
        )?;

        Ok(Self {
            expand,
            depthwise,
            se,
            project,
            residual: spec.stride == 1 && spec.input == spec.output,
        })
    }
}

impl Module for InvertedResidual {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut ys = match &self.expand {
            Some(expand) => expand.forward(xs)?,
            None => xs.clone(),
        };
        ys = self.depthwise.forward(&ys)?;
        if let Some(se) = &self.se {
            ys = se.forward(&ys)?;
        }
        ys = self.project.forward(&ys)?;

        if self.residual {
            ys + xs
        } else {
            Ok(ys)
        }
    }
}

/// MobileNetV3-Small classifier in inference mode
pub struct MobileNetV3Small {
    stem: ConvBnAct,
    blocks: Vec<InvertedResidual>,
    last_conv: ConvBnAct,
    hidden: Linear,
    head: Linear,
    num_classes: usize,
}

impl MobileNetV3Small {
    /// Build the network, pulling every parameter from `vb`
    ///
    /// The head is sized `HEAD_IN_FEATURES → num_classes`; a checkpoint
    /// trained for a different class count fails here with a shape error.
    pub fn new(num_classes: usize, vb: VarBuilder) -> Result<Self> {
        let features = vb.pp("features");

        let stem = ConvBnAct::new(
            3,
            STEM_CHANNELS,
            3,
            2,
            1,
            Some(Activation::Hardswish),
            features.pp("0"),
        )?;

        let blocks = BLOCKS
            .iter()
            .enumerate()
            .map(|(i, spec)| InvertedResidual::new(spec, features.pp((i + 1).to_string())))
            .collect::<Result<Vec<_>>>()?;

        let last_input = BLOCKS[BLOCKS.len() - 1].output;
        let last_conv = ConvBnAct::new(
            last_input,
            LAST_CONV_CHANNELS,
            1,
            1,
            1,
            Some(Activation::Hardswish),
            features.pp((BLOCKS.len() + 1).to_string()),
        )?;

        let classifier = vb.pp("classifier");
        let hidden = linear(LAST_CONV_CHANNELS, HEAD_IN_FEATURES, classifier.pp("0"))?;
        let head = linear(HEAD_IN_FEATURES, num_classes, classifier.pp("3"))?;

        Ok(Self {
            stem,
            blocks,
            last_conv,
            hidden,
            head,
            num_classes,
        })
    }

    /// Number of output scores per image
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl Module for MobileNetV3Small {
    /// `[N, 3, H, W]` normalized input → `[N, num_classes]` raw scores
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = self.stem.forward(xs)?;
        for block in &self.blocks {
            xs = block.forward(&xs)?;
        }
        let xs = self.last_conv.forward(&xs)?;

        let pooled = xs.mean(D::Minus1)?.mean(D::Minus1)?;
        let hidden = Activation::Hardswish.apply(&self.hidden.forward(&pooled)?)?;
        self.head.forward(&hidden)
    }
}
