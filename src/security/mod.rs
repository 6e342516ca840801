pub mod api_key_hashing;
