use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ndarray::Array3;
use tracing::debug;

use crate::architecture::SequenceModel;
use crate::error::Result;

/// Fixed optimisation settings of a backend model
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub shuffle: bool,
    pub clip_gradient: Option<f64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            learning_rate: 0.001,
            batch_size: 32,
            shuffle: true,
            clip_gradient: None,
        }
    }
}

/// Training metrics tracked per epoch
#[derive(Debug, Clone)]
pub struct TrainingMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub time_elapsed: Duration,
}

/// Outcome of one complete training run
#[derive(Debug, Clone)]
pub struct TrainingHistory {
    pub started_at: DateTime<Utc>,
    pub metrics: Vec<TrainingMetrics>,
    pub total_time: Duration,
}

impl TrainingHistory {
    pub fn epochs(&self) -> usize {
        self.metrics.len()
    }

    pub fn final_loss(&self) -> Option<f64> {
        self.metrics.last().map(|m| m.train_loss)
    }
}

/// Receives training lifecycle events, synchronously and in order.
///
/// Epoch numbers are 0-based. Observers only watch; they cannot stop
/// training.
pub trait TrainingObserver {
    fn on_training_start(&mut self, _total_epochs: usize) {}

    fn on_epoch_start(&mut self, _epoch: usize, _total_epochs: usize) {}

    fn on_epoch_end(&mut self, _epoch: usize, _total_epochs: usize, _loss: f64, _elapsed: Duration) {}

    fn on_training_end(&mut self, _elapsed: Duration) {}
}

/// Emits the training lifecycle as `tracing` debug events
#[derive(Debug, Default)]
pub struct TrainingLogger {
    description: Option<String>,
}

impl TrainingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a description of the model being trained to the start event.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl TrainingObserver for TrainingLogger {
    fn on_training_start(&mut self, total_epochs: usize) {
        match &self.description {
            Some(description) => debug!(total_epochs, model = %description, "Training started"),
            None => debug!(total_epochs, "Training started"),
        }
    }

    fn on_epoch_start(&mut self, epoch: usize, total_epochs: usize) {
        debug!("Started Epoch {}/{}", epoch + 1, total_epochs);
    }

    fn on_epoch_end(&mut self, epoch: usize, total_epochs: usize, loss: f64, elapsed: Duration) {
        debug!(
            "Finished Epoch {}/{}: loss = {}, time taken = {:?}",
            epoch + 1,
            total_epochs,
            loss,
            elapsed
        );
    }

    fn on_training_end(&mut self, elapsed: Duration) {
        debug!("Training finished. Took {:?}", elapsed);
    }
}

/// Drives a model through a fixed number of epochs
pub struct Trainer {
    epochs: usize,
    observers: Vec<Box<dyn TrainingObserver>>,
}

impl Trainer {
    pub fn new(epochs: usize) -> Self {
        Trainer {
            epochs,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn TrainingObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Train for exactly `epochs` epochs, notifying every observer.
    pub fn fit<M: SequenceModel>(&mut self, model: &mut M, input: &Array3<f64>, target: &Array3<f64>) -> Result<TrainingHistory> {
        let started_at = Utc::now();
        let training_start = Instant::now();
        let mut metrics = Vec::with_capacity(self.epochs);

        for observer in &mut self.observers {
            observer.on_training_start(self.epochs);
        }

        for epoch in 0..self.epochs {
            for observer in &mut self.observers {
                observer.on_epoch_start(epoch, self.epochs);
            }

            let epoch_start = Instant::now();
            let train_loss = model.train_epoch(input, target)?;
            let time_elapsed = epoch_start.elapsed();

            for observer in &mut self.observers {
                observer.on_epoch_end(epoch, self.epochs, train_loss, time_elapsed);
            }

            metrics.push(TrainingMetrics {
                epoch,
                train_loss,
                time_elapsed,
            });
        }

        let total_time = training_start.elapsed();
        for observer in &mut self.observers {
            observer.on_training_end(total_time);
        }

        Ok(TrainingHistory {
            started_at,
            metrics,
            total_time,
        })
    }
}
