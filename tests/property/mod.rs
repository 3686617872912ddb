//! Property-based tests for limiter eligibility, ledger totals and stop ordering

mod ledger;
mod limiter;
mod stop;
