use axum::extract::Multipart;
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{BazaarError, Result};
use crate::services::Upload;

/// A `multipart/form-data` body split into text fields and files.
#[derive(Debug, Default)]
pub struct MultipartForm {
    fields: HashMap<String, String>,
    files: Vec<(String, Upload)>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut form = MultipartForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| BazaarError::invalid(format!("Malformed form upload: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| BazaarError::invalid(format!("Upload of {} failed: {}", file_name, e)))?;
                    // Browsers send an empty part for an untouched file input.
                    if !file_name.is_empty() && !bytes.is_empty() {
                        form.files.push((name, Upload { file_name, bytes: bytes.to_vec() }));
                    }
                }
                None => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| BazaarError::invalid(format!("Field {} is unreadable: {}", name, e)))?;
                    form.fields.insert(name, text);
                }
            }
        }
        Ok(form)
    }

    /// Trimmed value, `None` when missing or blank.
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields.get(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    pub fn text_or_default(&self, name: &str) -> String {
        self.text(name).unwrap_or_default()
    }

    pub fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>> {
        match self.text(name) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| BazaarError::invalid(format!("{} is not a valid value for {}", raw, name))),
        }
    }

    pub fn checked(&self, name: &str) -> bool {
        matches!(self.text(name).as_deref(), Some("on" | "true" | "1"))
    }

    pub fn take_files(&mut self, name: &str) -> Vec<Upload> {
        let (matching, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.files).into_iter().partition(|(n, _)| n == name);
        self.files = rest;
        matching.into_iter().map(|(_, upload)| upload).collect()
    }

    pub fn take_file(&mut self, name: &str) -> Option<Upload> {
        self.take_files(name).into_iter().next()
    }
}

/// Checkbox value from an urlencoded form: present means ticked.
pub fn checkbox(value: &Option<String>) -> bool {
    matches!(value.as_deref(), Some("on" | "true" | "1"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(fields: &[(&str, &str)]) -> MultipartForm {
        MultipartForm {
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            files: vec![
                ("images".into(), Upload { file_name: "a.png".into(), bytes: vec![1] }),
                ("picture".into(), Upload { file_name: "me.jpg".into(), bytes: vec![2] }),
                ("images".into(), Upload { file_name: "b.png".into(), bytes: vec![3] }),
            ],
        }
    }

    #[test]
    fn reads_typed_fields() {
        let f = form(&[("name", "  Lamp "), ("price", "12.50"), ("category_id", "x"), ("is_for_rent", "on"), ("blank", " ")]);
        assert_eq!(f.text("name").as_deref(), Some("Lamp"));
        assert_eq!(f.text("blank"), None);
        assert_eq!(f.parse::<crate::domain::Money>("price").unwrap(), Some(crate::domain::Money::from_cents(1250)));
        assert!(f.parse::<i64>("category_id").is_err());
        assert_eq!(f.parse::<i64>("missing").unwrap(), None);
        assert!(f.checked("is_for_rent"));
        assert!(!f.checked("missing"));
    }

    #[test]
    fn files_are_taken_by_field_name() {
        let mut f = form(&[]);
        let images = f.take_files("images");
        assert_eq!(images.iter().map(|u| u.file_name.as_str()).collect::<Vec<_>>(), vec!["a.png", "b.png"]);
        assert_eq!(f.take_file("picture").unwrap().file_name, "me.jpg");
        assert!(f.take_file("picture").is_none());
    }
}
