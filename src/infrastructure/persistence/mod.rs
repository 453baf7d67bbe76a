pub mod postgres_message_repository;
