//! # Gradient Checkpointing
//!
//! Runs a segment of a network without recording it on the autodiff graph and
//! recomputes it under gradient tracking when its gradients are requested.
//!
//! The forward pass of a checkpointed segment executes on the inner (non-autodiff)
//! backend, so none of its intermediate activations are kept alive. Only detached
//! copies of its inputs are stored in a [`ReplayToken`]. Calling
//! [`ReplayToken::backward`] with the gradient of the segment output replays the
//! segment on the autodiff backend and returns the gradients of its inputs and of
//! every parameter it touched.
//!
//! The numerical result of the forward pass is the same with or without
//! checkpointing; only peak memory and compute differ. This requires a
//! deterministic segment: the untracked pass runs on the inner backend, where
//! dropout is disabled, while the replay runs with dropout enabled.

use burn::{
    module::AutodiffModule,
    optim::GradientsParams,
    prelude::*,
    tensor::backend::AutodiffBackend,
};

/// A pure tensor function over a module's parameters that can be replayed.
///
/// `input` is the primary tensor. `aux` carries any further tensors the segment
/// reads, such as a cross-attention context.
pub trait Segment<B: Backend, const D: usize> {
    fn run(&self, input: Tensor<B, D>, aux: Vec<Tensor<B, D>>) -> Tensor<B, D>;
}

/// Output of [`checkpoint`].
#[derive(Debug)]
pub struct Checkpointed<B: AutodiffBackend, const D: usize> {
    /// Segment output. Tracked when checkpointing was disabled, untracked otherwise.
    pub output: Tensor<B, D>,
    /// Present only when checkpointing was enabled.
    pub replay: Option<ReplayToken<B, D>>,
}

/// Detached copies of the inputs of a checkpointed segment.
#[derive(Debug)]
pub struct ReplayToken<B: AutodiffBackend, const D: usize> {
    input: Tensor<B, D>,
    aux: Vec<Tensor<B, D>>,
}

/// Gradients produced by replaying a checkpointed segment.
pub struct SegmentGrads<B: AutodiffBackend, const D: usize> {
    /// Gradient of the primary input.
    pub input: Option<Tensor<B::InnerBackend, D>>,
    /// Gradients of the auxiliary inputs, in order.
    pub aux: Vec<Option<Tensor<B::InnerBackend, D>>>,
    grads: B::Gradients,
}

/// Evaluates `segment`, trading activation memory for recomputation when `enabled`.
///
/// With `enabled == false` this is a plain tracked call of `segment.run`.
pub fn checkpoint<B, M, const D: usize>(
    segment: &M,
    input: Tensor<B, D>,
    aux: Vec<Tensor<B, D>>,
    enabled: bool,
) -> Checkpointed<B, D>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Segment<B, D>,
    M::InnerModule: Segment<B::InnerBackend, D>,
{
    if !enabled {
        return Checkpointed {
            output: segment.run(input, aux),
            replay: None,
        };
    }

    let output = segment.valid().run(
        input.clone().inner(),
        aux.iter().map(|tensor| tensor.clone().inner()).collect(),
    );

    Checkpointed {
        output: Tensor::from_inner(output),
        replay: Some(ReplayToken {
            input: input.detach(),
            aux: aux.into_iter().map(Tensor::detach).collect(),
        }),
    }
}

impl<B: AutodiffBackend, const D: usize> ReplayToken<B, D> {
    /// Recomputes the segment with gradient tracking and back-propagates
    /// `grad_output` through it.
    ///
    /// The replay runs on fresh handles of the stored inputs, so a segment whose
    /// first operation reuses its input buffer cannot corrupt them.
    pub fn backward<M>(
        self,
        segment: &M,
        grad_output: Tensor<B::InnerBackend, D>,
    ) -> SegmentGrads<B, D>
    where
        M: Segment<B, D>,
    {
        let input = self.input.require_grad();
        let aux: Vec<_> = self.aux.into_iter().map(Tensor::require_grad).collect();

        let output = segment.run(input.clone(), aux.clone());
        let grads = (output * Tensor::from_inner(grad_output)).sum().backward();

        SegmentGrads {
            input: input.grad(&grads),
            aux: aux.iter().map(|tensor| tensor.grad(&grads)).collect(),
            grads,
        }
    }
}

impl<B: AutodiffBackend, const D: usize> SegmentGrads<B, D> {
    /// Gradient of a tracked tensor read by the segment, typically a parameter value.
    pub fn grad<const K: usize>(
        &self,
        tensor: &Tensor<B, K>,
    ) -> Option<Tensor<B::InnerBackend, K>> {
        tensor.grad(&self.grads)
    }

    /// Converts the recorded gradients into per-parameter gradients of `module`,
    /// ready for an optimizer step.
    pub fn into_params<M: AutodiffModule<B>>(self, module: &M) -> GradientsParams {
        GradientsParams::from_grads(self.grads, module)
    }

    /// Continues back-propagation from the segment inputs into whatever graph
    /// produced `input` and `aux` originally.
    ///
    /// Returns `None` when none of the segment inputs received a gradient.
    pub fn propagate(
        &self,
        input: Tensor<B, D>,
        aux: Vec<Tensor<B, D>>,
    ) -> Option<B::Gradients> {
        let upstream = std::iter::once((input, self.input.clone()))
            .chain(aux.into_iter().zip(self.aux.iter().cloned()))
            .filter_map(|(tensor, grad)| {
                grad.map(|grad| (tensor * Tensor::from_inner(grad)).sum())
            })
            .reduce(|acc, term| acc + term)?;

        Some(upstream.backward())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{Autodiff, NdArray},
        nn::{Linear, LinearConfig},
        tensor::activation::gelu,
    };

    type TestBackend = Autodiff<NdArray<f32>>;

    #[derive(Module, Debug)]
    struct TwoLayer<B: Backend> {
        fc1: Linear<B>,
        fc2: Linear<B>,
    }

    impl<B: Backend> TwoLayer<B> {
        fn new(device: &B::Device) -> Self {
            Self {
                fc1: LinearConfig::new(8, 16).init(device),
                fc2: LinearConfig::new(16, 8).init(device),
            }
        }
    }

    impl<B: Backend> Segment<B, 2> for TwoLayer<B> {
        fn run(&self, input: Tensor<B, 2>, _aux: Vec<Tensor<B, 2>>) -> Tensor<B, 2> {
            self.fc2.forward(gelu(self.fc1.forward(input)))
        }
    }

    /// Scales its input in place before mixing it with a context tensor.
    #[derive(Module, Debug)]
    struct Mixing<B: Backend> {
        fc: Linear<B>,
    }

    impl<B: Backend> Segment<B, 2> for Mixing<B> {
        fn run(&self, input: Tensor<B, 2>, aux: Vec<Tensor<B, 2>>) -> Tensor<B, 2> {
            let scaled = input.mul_scalar(2.0);
            let mixed = aux.into_iter().fold(scaled, |acc, context| acc * context);
            self.fc.forward(mixed)
        }
    }

    fn fixed_input(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 2> {
        let values: Vec<f32> = (0..32).map(|i| ((i as f32) * 0.37).sin()).collect();
        Tensor::from_data(TensorData::new(values, [4, 8]), device)
    }

    fn max_abs_diff<const D: usize>(
        a: Tensor<NdArray<f32>, D>,
        b: Tensor<NdArray<f32>, D>,
    ) -> f32 {
        (a - b).abs().max().into_scalar()
    }

    #[test]
    fn disabled_checkpoint_is_a_tracked_call() {
        let device = Default::default();
        let model = TwoLayer::<TestBackend>::new(&device);
        let x = fixed_input(&device).require_grad();

        let result = checkpoint(&model, x.clone(), vec![], false);
        assert!(result.replay.is_none());

        let grads = result.output.sum().backward();
        assert!(x.grad(&grads).is_some());
    }

    #[test]
    fn forward_output_is_identical_with_and_without_checkpointing() {
        let device = Default::default();
        let model = TwoLayer::<TestBackend>::new(&device);
        let x = fixed_input(&device).require_grad();

        let plain = checkpoint(&model, x.clone(), vec![], false).output;
        let checkpointed = checkpoint(&model, x, vec![], true).output;

        assert_eq!(max_abs_diff(plain.inner(), checkpointed.inner()), 0.0);
    }

    #[test]
    fn replayed_gradients_match_plain_backward() {
        let device = Default::default();
        let model = TwoLayer::<TestBackend>::new(&device);

        let x_plain = fixed_input(&device).require_grad();
        let grads = model.run(x_plain.clone(), vec![]).sum().backward();
        let input_grad = x_plain.grad(&grads).unwrap();
        let weight_grad = model.fc1.weight.val().grad(&grads).unwrap();
        let bias_grad = model.fc2.bias.as_ref().unwrap().val().grad(&grads).unwrap();

        let x = fixed_input(&device).require_grad();
        let result = checkpoint(&model, x, vec![], true);
        let grad_output = result.output.inner().ones_like();
        let replayed = result.replay.unwrap().backward(&model, grad_output);

        assert!(max_abs_diff(replayed.input.clone().unwrap(), input_grad) < 1e-5);
        assert!(max_abs_diff(replayed.grad(&model.fc1.weight.val()).unwrap(), weight_grad) < 1e-5);
        assert!(
            max_abs_diff(
                replayed.grad(&model.fc2.bias.as_ref().unwrap().val()).unwrap(),
                bias_grad
            ) < 1e-5
        );
    }

    #[test]
    fn replay_grads_convert_to_parameter_grads() {
        let device = Default::default();
        let model = TwoLayer::<TestBackend>::new(&device);

        let plain_grads = model.run(fixed_input(&device), vec![]).sum().backward();
        let plain = GradientsParams::from_grads(plain_grads, &model);

        let result = checkpoint(&model, fixed_input(&device), vec![], true);
        let grad_output = result.output.inner().ones_like();
        let params = result
            .replay
            .unwrap()
            .backward(&model, grad_output)
            .into_params(&model);

        let expected = plain.get::<NdArray<f32>, 2>(model.fc1.weight.id).unwrap();
        let grad = params.get::<NdArray<f32>, 2>(model.fc1.weight.id).unwrap();
        // Linear weights are stored as [d_input, d_output].
        assert_eq!(grad.dims(), [8, 16]);
        assert!(max_abs_diff(grad, expected) < 1e-5);
        assert_eq!(params.len(), plain.len());
    }

    #[test]
    fn replay_handles_segments_that_rewrite_their_input() {
        let device = Default::default();
        let model = Mixing {
            fc: LinearConfig::new(8, 8).init::<TestBackend>(&device),
        };
        let context = fixed_input(&device).add_scalar(1.5);

        let x_plain = fixed_input(&device).require_grad();
        let context_plain = context.clone().require_grad();
        let grads = model
            .run(x_plain.clone(), vec![context_plain.clone()])
            .sum()
            .backward();

        let result = checkpoint(&model, fixed_input(&device), vec![context.clone()], true);
        let grad_output = result.output.inner().ones_like();
        let replayed = result.replay.unwrap().backward(&model, grad_output);

        assert!(
            max_abs_diff(replayed.input.clone().unwrap(), x_plain.grad(&grads).unwrap()) < 1e-5
        );
        assert!(
            max_abs_diff(
                replayed.aux[0].clone().unwrap(),
                context_plain.grad(&grads).unwrap()
            ) < 1e-5
        );
    }

    #[test]
    fn propagate_reaches_the_upstream_graph() {
        let device = Default::default();
        let model = TwoLayer::<TestBackend>::new(&device);
        let source = fixed_input(&device).require_grad();

        // Plain reference: upstream scaling followed by the segment.
        let grads = model.run(source.clone() * 3.0, vec![]).sum().backward();
        let expected = source.grad(&grads).unwrap();

        let upstream = source.clone() * 3.0;
        let result = checkpoint(&model, upstream.clone(), vec![], true);
        let grad_output = result.output.inner().ones_like();
        let replayed = result.replay.unwrap().backward(&model, grad_output);
        let upstream_grads = replayed.propagate(upstream, vec![]).unwrap();

        assert!(max_abs_diff(source.grad(&upstream_grads).unwrap(), expected) < 1e-5);
    }
}
