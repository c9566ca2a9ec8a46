/// Variational dropout used by the recurrent cells.
pub mod dropout;

/// Batched LSTM cell with full backpropagation.
pub mod lstm_cell;

/// Dense projection shared across time steps.
pub mod linear;
