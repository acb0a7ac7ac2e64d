pub mod upload_dtos;
