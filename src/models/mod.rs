/// Stacked LSTM with reshape-then-project output, and its ndarray backend.
pub mod windowed_lstm;
