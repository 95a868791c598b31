//! Feed-forward neural classifier
//!
//! Architecture: Input(d) → Hidden → ReLU → Hidden/2 → ReLU
//!                        → outcome_head(3), score_head(2)
//!
//! The score head regresses normalised final goals, so this is the one
//! backend that supports score prediction. Trained with softmax
//! cross-entropy plus weighted MSE, early-stopped on validation loss.

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::module::{AutodiffModule, Module};
use burn::nn::{Linear, LinearConfig};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::activation::{log_softmax, relu};
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};
use serde::{Deserialize, Serialize};

use crate::model::{
    softmax, validate_simplex, FitControl, Hyperparameters, ModelBackend, ModelKind, TrainingSet,
    CLASSES,
};
use crate::{FootyError, Result};

type InferenceBackend = NdArray<f32>;
type TrainBackend = Autodiff<InferenceBackend>;

#[derive(Module, Debug)]
struct Net<B: Backend> {
    hidden1: Linear<B>,
    hidden2: Linear<B>,
    outcome_head: Linear<B>,
    score_head: Linear<B>,
}

impl<B: Backend> Net<B> {
    fn new(device: &B::Device, input_dim: usize, hidden: usize) -> Self {
        let h2 = (hidden / 2).max(4);
        Net {
            hidden1: LinearConfig::new(input_dim, hidden).init(device),
            hidden2: LinearConfig::new(hidden, h2).init(device),
            outcome_head: LinearConfig::new(h2, CLASSES).init(device),
            score_head: LinearConfig::new(h2, 2).init(device),
        }
    }

    /// Returns (outcome logits [n, 3], normalised scores [n, 2])
    fn forward(&self, x: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let x = relu(self.hidden1.forward(x));
        let x = relu(self.hidden2.forward(x));
        (
            self.outcome_head.forward(x.clone()),
            self.score_head.forward(x),
        )
    }
}

/// Serialized sidecar around the burn weight record
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NeuralState {
    input_dim: usize,
    hidden: usize,
    feat_mean: Vec<f32>,
    feat_std: Vec<f32>,
    score_mean: f32,
    score_std: f32,
    record: Vec<u8>,
}

#[derive(Default)]
pub struct NeuralModel {
    state: Option<NeuralState>,
    net: Option<Net<InferenceBackend>>,
}

impl NeuralModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let state: NeuralState = serde_json::from_slice(bytes)?;
        let device = NdArrayDevice::default();
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(state.record.clone(), &device)
            .map_err(|e| FootyError::InvalidModelOutput(format!("weight record: {}", e)))?;
        let net =
            Net::<InferenceBackend>::new(&device, state.input_dim, state.hidden).load_record(record);
        Ok(NeuralModel {
            state: Some(state),
            net: Some(net),
        })
    }

    fn parts(&self) -> Result<(&NeuralState, &Net<InferenceBackend>)> {
        match (&self.state, &self.net) {
            (Some(state), Some(net)) => Ok((state, net)),
            _ => Err(FootyError::InvalidModelOutput(
                "neural model is unfitted".into(),
            )),
        }
    }

    fn standardize(state: &NeuralState, features: &[f64]) -> Vec<f32> {
        features
            .iter()
            .zip(state.feat_mean.iter().zip(state.feat_std.iter()))
            .map(|(v, (m, s))| (*v as f32 - m) / s)
            .collect()
    }

    fn input_tensor<B: Backend>(
        rows: &[Vec<f32>],
        device: &B::Device,
    ) -> Tensor<B, 2> {
        let d = rows.first().map(|r| r.len()).unwrap_or(0);
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Tensor::<B, 1>::from_floats(flat.as_slice(), device).reshape([rows.len(), d])
    }

    fn loss<B: Backend>(
        net: &Net<B>,
        x: Tensor<B, 2>,
        onehot: Tensor<B, 2>,
        goals: Tensor<B, 2>,
        score_weight: f64,
    ) -> Tensor<B, 1> {
        let (logits, scores) = net.forward(x);
        let ce = (log_softmax(logits, 1) * onehot).sum_dim(1).mean().neg();
        let mse = (scores - goals).powf_scalar(2.0).mean();
        ce + mse.mul_scalar(score_weight)
    }
}

impl ModelBackend for NeuralModel {
    fn kind(&self) -> ModelKind {
        ModelKind::NeuralNet
    }

    fn fit(
        &mut self,
        train: &TrainingSet,
        valid: Option<&TrainingSet>,
        hp: &Hyperparameters,
        ctl: &FitControl,
    ) -> Result<()> {
        if train.is_empty() {
            return Err(FootyError::InsufficientData { have: 0, need: 1 });
        }
        let n = train.len();
        let d = train.n_features();
        let hidden = hp.get_usize("hidden_size", 64);
        let epochs = hp.get_usize("epochs", 200);
        let lr = hp.get_f64("learning_rate", 1e-3);
        let score_weight = hp.get_f64("score_weight", 0.3);
        let patience = hp.get_usize("early_stopping_patience", 20);
        let seed = hp.get_u64("seed", 42);

        <TrainBackend as Backend>::seed(seed);
        let device = NdArrayDevice::default();

        // Standardise features on the train partition
        let mut feat_mean = vec![0.0f32; d];
        for x in &train.features {
            for (j, v) in x.iter().enumerate() {
                feat_mean[j] += *v as f32;
            }
        }
        for m in &mut feat_mean {
            *m /= n as f32;
        }
        let mut feat_std = vec![0.0f32; d];
        for x in &train.features {
            for (j, v) in x.iter().enumerate() {
                let diff = *v as f32 - feat_mean[j];
                feat_std[j] += diff * diff;
            }
        }
        for s in &mut feat_std {
            *s = (*s / n as f32).sqrt();
            if *s < 1e-6 {
                *s = 1.0;
            }
        }

        // Normalise goals the way the score head will see them
        let all_goals: Vec<f32> = train.goals.iter().flat_map(|g| [g.0, g.1]).collect();
        let score_mean = all_goals.iter().sum::<f32>() / all_goals.len().max(1) as f32;
        let score_var = all_goals
            .iter()
            .map(|g| (g - score_mean) * (g - score_mean))
            .sum::<f32>()
            / all_goals.len().max(1) as f32;
        let score_std = score_var.sqrt().max(0.5);

        let state = NeuralState {
            input_dim: d,
            hidden,
            feat_mean,
            feat_std,
            score_mean,
            score_std,
            record: Vec::new(),
        };

        let to_rows = |set: &TrainingSet| -> (Vec<Vec<f32>>, Vec<f32>, Vec<f32>) {
            let rows: Vec<Vec<f32>> = set
                .features
                .iter()
                .map(|x| Self::standardize(&state, x))
                .collect();
            let mut onehot = vec![0.0f32; set.len() * CLASSES];
            for (i, label) in set.labels.iter().enumerate() {
                onehot[i * CLASSES + label.index()] = 1.0;
            }
            let goals: Vec<f32> = set
                .goals
                .iter()
                .flat_map(|g| {
                    [
                        (g.0 - score_mean) / score_std,
                        (g.1 - score_mean) / score_std,
                    ]
                })
                .collect();
            (rows, onehot, goals)
        };

        let (train_rows, train_onehot, train_goals) = to_rows(train);
        let x_train = Self::input_tensor::<TrainBackend>(&train_rows, &device);
        let y_train = Tensor::<TrainBackend, 1>::from_floats(train_onehot.as_slice(), &device)
            .reshape([n, CLASSES]);
        let g_train = Tensor::<TrainBackend, 1>::from_floats(train_goals.as_slice(), &device)
            .reshape([n, 2]);

        let valid_tensors = valid.filter(|v| !v.is_empty()).map(|v| {
            let (rows, onehot, goals) = to_rows(v);
            let x = Self::input_tensor::<TrainBackend>(&rows, &device);
            let y = Tensor::<TrainBackend, 1>::from_floats(onehot.as_slice(), &device)
                .reshape([v.len(), CLASSES]);
            let g = Tensor::<TrainBackend, 1>::from_floats(goals.as_slice(), &device)
                .reshape([v.len(), 2]);
            (x, y, g)
        });

        let mut net = Net::<TrainBackend>::new(&device, d, hidden);
        let mut optimizer = AdamConfig::new().init();
        let mut best_net = net.clone();
        let mut best_valid_loss = f32::INFINITY;
        let mut epochs_without_improvement = 0;

        for epoch in 0..epochs {
            ctl.check()?;

            let loss = Self::loss(
                &net,
                x_train.clone(),
                y_train.clone(),
                g_train.clone(),
                score_weight,
            );
            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &net);
            net = optimizer.step(lr, net, grads);

            if let Some((x_val, y_val, g_val)) = &valid_tensors {
                let valid_loss: f32 = Self::loss(
                    &net,
                    x_val.clone(),
                    y_val.clone(),
                    g_val.clone(),
                    score_weight,
                )
                .into_scalar()
                .elem();

                if valid_loss < best_valid_loss {
                    best_valid_loss = valid_loss;
                    best_net = net.clone();
                    epochs_without_improvement = 0;
                } else {
                    epochs_without_improvement += 1;
                    if epochs_without_improvement >= patience {
                        log::debug!(
                            "Early stopping at epoch {} (best valid loss {:.4})",
                            epoch + 1,
                            best_valid_loss
                        );
                        break;
                    }
                }
            } else {
                best_net = net.clone();
            }
        }

        let inference_net: Net<InferenceBackend> = best_net.valid();
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .record(inference_net.clone().into_record(), ())
            .map_err(|e| FootyError::InvalidModelOutput(format!("weight record: {}", e)))?;

        self.state = Some(NeuralState { record, ..state });
        self.net = Some(inference_net);
        Ok(())
    }

    fn predict_proba(&self, features: &[f64]) -> Result<[f64; 3]> {
        let (state, net) = self.parts()?;
        if features.len() != state.input_dim {
            return Err(FootyError::InvalidModelOutput(format!(
                "feature length {} does not match trained width {}",
                features.len(),
                state.input_dim
            )));
        }
        let device = NdArrayDevice::default();
        let row = Self::standardize(state, features);
        let x = Self::input_tensor::<InferenceBackend>(std::slice::from_ref(&row), &device);
        let (logits, _) = net.forward(x);
        let data = logits.into_data();
        let values = data
            .as_slice::<f32>()
            .map_err(|e| FootyError::InvalidModelOutput(format!("logit tensor: {:?}", e)))?;
        let probs = softmax(&[values[0] as f64, values[1] as f64, values[2] as f64]);
        validate_simplex(&probs)?;
        Ok(probs)
    }

    fn predict_score(&self, features: &[f64]) -> Option<Result<(f64, f64)>> {
        let (state, net) = match self.parts() {
            Ok(parts) => parts,
            Err(e) => return Some(Err(e)),
        };
        if features.len() != state.input_dim {
            return Some(Err(FootyError::InvalidModelOutput(format!(
                "feature length {} does not match trained width {}",
                features.len(),
                state.input_dim
            ))));
        }
        let device = NdArrayDevice::default();
        let row = Self::standardize(state, features);
        let x = Self::input_tensor::<InferenceBackend>(std::slice::from_ref(&row), &device);
        let (_, scores) = net.forward(x);
        let data = scores.into_data();
        let values = match data.as_slice::<f32>() {
            Ok(values) => values,
            Err(e) => {
                return Some(Err(FootyError::InvalidModelOutput(format!(
                    "score tensor: {:?}",
                    e
                ))))
            }
        };
        let denorm = |v: f32| ((v * state.score_std + state.score_mean) as f64).max(0.0);
        Some(Ok((denorm(values[0]), denorm(values[1]))))
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let (state, _) = self.parts()?;
        Ok(serde_json::to_vec(state)?)
    }
}
