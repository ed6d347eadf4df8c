//! End-to-end tests for the phase engine.
//!
//! Runs the real engine against the file and memory stores with an
//! in-memory executor, exercising resume, pause, stop and failure paths.

mod phase_run;
