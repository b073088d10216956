//! End-to-end lowering scenarios live under `tests/`.
