//! Multipart form reading shared by the upload endpoints.

use std::collections::HashMap;

use axum::extract::Multipart;

use crate::api::error::ApiError;
use crate::bridge::Upload;

/// Field carrying the uploaded file.
pub const FILE_FIELD: &str = "file";

/// All fields of one multipart request. Only `file` is read as bytes.
#[derive(Debug, Default)]
pub struct Form {
    upload: Option<Upload>,
    text: HashMap<String, String>,
}

impl Form {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Form::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or("").to_string();
            if name == FILE_FIELD {
                let file_name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await?;
                // Browsers send an empty, unnamed part when no file was picked.
                let picked = !bytes.is_empty() || file_name.as_deref().is_some_and(|n| !n.is_empty());
                if picked {
                    form.upload = Some(Upload::new(file_name, bytes.to_vec()));
                }
            } else if !name.is_empty() {
                let value = field.text().await?;
                form.text.insert(name, value);
            }
        }

        Ok(form)
    }

    /// Trimmed value of a text field, `None` when absent or blank.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.text
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn text_or(&self, name: &str, default: &str) -> String {
        self.text(name).unwrap_or(default).to_string()
    }

    pub fn required_text(&self, name: &str) -> Result<String, ApiError> {
        self.text(name)
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest(format!("{name} is required")))
    }

    pub fn take_file(&mut self) -> Result<Upload, ApiError> {
        self.upload
            .take()
            .ok_or_else(|| ApiError::BadRequest("No file uploaded".into()))
    }
}
