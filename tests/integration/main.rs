//! Integration test harness: a deterministic mock venue plus end-to-end
//! cycle simulations through the full engine.

mod mock_venue;
mod simulation;
