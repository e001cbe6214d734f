use comms::specs::{ModuleKind, ModuleSpec};
use ndarray::Array2;
use rand::{SeedableRng, rngs::StdRng};

use super::{
    ParamBuffer, Sequential,
    activations::ActFn,
    layers::{ConvGeometry, Layer},
};
use crate::{Result, optimization::Optimizer};

/// The side of the square images the networks are built for.
pub const IMAGE_SIDE: usize = 28;

/// The amount of features the convolutional front hands to the fully connected head.
pub const FLAT_FEATURES: usize = 16 * 5 * 5;

/// conv(5x5, pad 2) + relu + pool, conv(5x5) + relu + pool, flatten.
fn conv_layers(in_channels: usize) -> Result<Vec<Layer>> {
    let side = IMAGE_SIDE;

    Ok(vec![
        Layer::conv2d(
            ConvGeometry {
                in_channels,
                out_channels: 6,
                kernel: 5,
                stride: 1,
                padding: 2,
                in_hw: (side, side),
            },
            Some(ActFn::Relu),
        )?,
        Layer::max_pool2d(6, (side, side), 2)?,
        Layer::conv2d(
            ConvGeometry {
                in_channels: 6,
                out_channels: 16,
                kernel: 5,
                stride: 1,
                padding: 0,
                in_hw: (side / 2, side / 2),
            },
            Some(ActFn::Relu),
        )?,
        Layer::max_pool2d(16, (side / 2 - 4, side / 2 - 4), 2)?,
    ])
}

/// fc(400, 120) + relu, fc(120, classes).
fn fc_layers(num_classes: usize) -> Vec<Layer> {
    vec![
        Layer::dense((FLAT_FEATURES, 120), Some(ActFn::Relu)),
        Layer::dense((120, num_classes), None),
    ]
}

/// A network together with its parameters and their gradient.
///
/// Images enter as `(batch, channels * 28 * 28)` rows, the output of the network are the
/// unnormalized class scores.
#[derive(Debug, Clone)]
pub struct Module {
    kind: ModuleKind,
    sequential: Sequential,
    params: ParamBuffer,
}

impl Module {
    /// Creates a new `Module` of the given kind with freshly initialized parameters.
    ///
    /// # Arguments
    /// * `kind` - Which network or piece of it to build.
    /// * `seed` - An optional seed for the initialization.
    ///
    /// # Returns
    /// A new `Module` or an error if its parameters couldn't be initialized.
    pub fn new(kind: ModuleKind, seed: Option<u64>) -> Result<Self> {
        let layers = match kind {
            ModuleKind::Net {
                in_channels,
                num_classes,
            } => {
                let mut layers = conv_layers(in_channels)?;
                layers.extend(fc_layers(num_classes));
                layers
            }
            ModuleKind::SubNetConv { in_channels } => conv_layers(in_channels)?,
            ModuleKind::SubNetFc { num_classes } => fc_layers(num_classes),
        };

        let sequential = Sequential::new(layers)?;
        let mut params = ParamBuffer::zeros(sequential.size());

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        sequential.init_params(params.weights_mut(), &mut rng)?;

        Ok(Self {
            kind,
            sequential,
            params,
        })
    }

    pub fn from_spec(spec: &ModuleSpec) -> Result<Self> {
        Self::new(spec.kind, spec.seed)
    }

    /// The whole convolutional network.
    pub fn net(in_channels: usize, num_classes: usize, seed: Option<u64>) -> Result<Self> {
        Self::new(
            ModuleKind::Net {
                in_channels,
                num_classes,
            },
            seed,
        )
    }

    /// The convolutional blocks of the network, ending in a flatten.
    pub fn sub_net_conv(in_channels: usize, seed: Option<u64>) -> Result<Self> {
        Self::new(ModuleKind::SubNetConv { in_channels }, seed)
    }

    /// The fully connected head of the network.
    pub fn sub_net_fc(num_classes: usize, seed: Option<u64>) -> Result<Self> {
        Self::new(ModuleKind::SubNetFc { num_classes }, seed)
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// Returns the amount of parameters in the module.
    pub fn size(&self) -> usize {
        self.params.len()
    }

    pub fn in_len(&self) -> usize {
        self.sequential.in_len()
    }

    pub fn out_len(&self) -> usize {
        self.sequential.out_len()
    }

    pub fn parameters(&self) -> &[f32] {
        self.params.weights()
    }

    pub fn grad(&self) -> &[f32] {
        self.params.grad()
    }

    /// Replaces the module's parameters, e.g. with ones trained elsewhere.
    pub fn load_parameters(&mut self, params: &[f32]) -> Result<()> {
        self.params.load(params)
    }

    pub fn forward(&mut self, x: Array2<f32>) -> Result<Array2<f32>> {
        self.sequential.forward(self.params.weights(), x)
    }

    /// Backpropagates the gradient of the loss with respect to the last forward's output.
    ///
    /// The parameters' gradient is added to whatever was accumulated since the last
    /// `zero_grad`.
    ///
    /// # Returns
    /// The gradient with respect to the last forward's input.
    pub fn backward(&mut self, d: Array2<f32>) -> Result<Array2<f32>> {
        let (weights, grad) = self.params.split_mut();
        self.sequential.backward(weights, grad, d)
    }

    pub fn zero_grad(&mut self) {
        self.params.zero_grad();
    }

    /// Updates the parameters with the accumulated gradient.
    pub fn step<O: Optimizer + ?Sized>(&mut self, optimizer: &mut O) -> Result<()> {
        let (grad, weights) = self.params.for_update();
        optimizer.update_params(grad, weights)
    }

    /// Updates the parameters with a gradient accumulated outside of the module.
    pub fn apply<O: Optimizer + ?Sized>(&mut self, optimizer: &mut O, grad: &[f32]) -> Result<()> {
        optimizer.update_params(grad, self.params.weights_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_pieces_add_up_to_the_whole_net() {
        let net = Module::net(1, 10, Some(0)).unwrap();
        let conv = Module::sub_net_conv(1, Some(0)).unwrap();
        let fc = Module::sub_net_fc(10, Some(0)).unwrap();

        assert_eq!(net.in_len(), 28 * 28);
        assert_eq!(conv.out_len(), FLAT_FEATURES);
        assert_eq!(fc.in_len(), FLAT_FEATURES);
        assert_eq!(net.out_len(), 10);
        assert_eq!(net.size(), conv.size() + fc.size());

        // (25 + 1) * 6 + (150 + 1) * 16 and (400 + 1) * 120 + (120 + 1) * 10
        assert_eq!(conv.size(), 2572);
        assert_eq!(fc.size(), 49330);
    }

    #[test]
    fn seeded_init_is_reproducible_and_bounded() {
        let a = Module::sub_net_fc(10, Some(7)).unwrap();
        let b = Module::sub_net_fc(10, Some(7)).unwrap();
        assert_eq!(a.parameters(), b.parameters());

        let bound = 1. / (FLAT_FEATURES as f32).sqrt();
        let first_layer = (FLAT_FEATURES + 1) * 120;
        assert!(
            a.parameters()[..first_layer]
                .iter()
                .all(|p| p.abs() <= bound)
        );
    }

    #[test]
    fn chaining_the_pieces_equals_the_whole_net() {
        let mut conv = Module::sub_net_conv(1, Some(1)).unwrap();
        let mut fc = Module::sub_net_fc(10, Some(2)).unwrap();
        let mut net = Module::net(1, 10, None).unwrap();
        net.load_parameters(&[conv.parameters(), fc.parameters()].concat())
            .unwrap();

        let x = Array2::from_shape_fn((3, 28 * 28), |(i, j)| ((i * 31 + j * 7) % 17) as f32 / 17.);

        let chained = fc.forward(conv.forward(x.clone()).unwrap()).unwrap();
        let whole = net.forward(x).unwrap();

        assert_eq!(chained.dim(), (3, 10));
        chained
            .iter()
            .zip(&whole)
            .for_each(|(a, b)| assert!((a - b).abs() < 1e-5, "{a} != {b}"));
    }
}
