mod helpers;


// Priority 2: robustness tests
mod tests_corruption;
