mod helpers;

// Planning and ordering
mod tests_bucket;
