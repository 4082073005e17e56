mod rewrite_properties;
