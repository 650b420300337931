mod tests_timestamp;
