pub mod kv_routes;
