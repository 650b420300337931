mod tests_iter;
