mod test_get_or_create;
