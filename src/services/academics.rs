//! Universities, colleges, majors and product categories.

use tracing::info;

use super::validation::Validator;
use super::Marketplace;
use crate::domain::*;
use crate::error::{BazaarError, Result};

pub const UNSPECIFIED_LOCATION: &str = "Not specified";

fn clean_name(field: &str, value: &str, max: usize) -> Result<String> {
    let value = value.trim();
    Validator::new().required(field, value).max_len(field, value, max).finish()?;
    Ok(value.to_string())
}

impl Marketplace {
    fn admin_page(&self, page: Option<i64>) -> Option<PageRequest> {
        Some(PageRequest::new(page, None, self.settings.admin_page_size))
    }

    // Universities

    pub async fn list_universities(&self, search: Option<String>, page: Option<i64>) -> Result<Page<UniversitySummary>> {
        self.storage
            .list_universities(&SearchFilter { search, parent_id: None, page: self.admin_page(page) })
            .await
    }

    pub async fn all_universities(&self) -> Result<Vec<University>> {
        self.storage.all_universities().await
    }

    pub async fn university(&self, id: Id) -> Result<University> {
        self.storage.get_university(id).await?.ok_or_else(|| BazaarError::not_found("university"))
    }

    pub async fn create_university(&self, name: &str, location: &str) -> Result<University> {
        let name = clean_name("Name", name, 150)?;
        let location = clean_name("Location", location, 150)?;
        let university = self.storage.create_university(&name, &location).await?;
        info!(university_id = university.id, name = %university.name, "University created");
        Ok(university)
    }

    /// Name-only creation from the registration form. Location is left unspecified.
    pub async fn quick_create_university(&self, name: &str) -> Result<University> {
        let name = clean_name("Name", name, 150)?;
        if self.storage.find_university_by_name(&name).await?.is_some() {
            return Err(BazaarError::conflict("University already exists"));
        }
        self.create_university(&name, UNSPECIFIED_LOCATION).await
    }

    pub async fn update_university(&self, id: Id, name: &str, location: &str) -> Result<University> {
        let mut university = self.university(id).await?;
        university.name = clean_name("Name", name, 150)?;
        university.location = clean_name("Location", location, 150)?;
        self.storage.update_university(&university).await?;
        Ok(university)
    }

    pub async fn delete_university(&self, id: Id) -> Result<()> {
        let university = self.university(id).await?;
        if self.storage.count_users_in_university(id).await? > 0 {
            return Err(BazaarError::conflict(format!(
                "Cannot delete {} because users are associated with it",
                university.name
            )));
        }
        self.storage.delete_university(id).await?;
        info!(university_id = id, "University deleted");
        Ok(())
    }

    // Colleges

    pub async fn list_colleges(
        &self,
        search: Option<String>,
        university_id: Option<Id>,
        page: Option<i64>,
    ) -> Result<Page<CollegeSummary>> {
        self.storage
            .list_colleges(&SearchFilter { search, parent_id: university_id, page: self.admin_page(page) })
            .await
    }

    pub async fn colleges_for_university(&self, university_id: Id) -> Result<Vec<College>> {
        self.storage.colleges_for_university(university_id).await
    }

    pub async fn college(&self, id: Id) -> Result<College> {
        self.storage.get_college(id).await?.ok_or_else(|| BazaarError::not_found("college"))
    }

    pub async fn create_college(&self, name: &str, university_id: Id) -> Result<College> {
        let name = clean_name("Name", name, 150)?;
        self.university(university_id).await?;
        let college = self.storage.create_college(&name, university_id).await?;
        info!(college_id = college.id, university_id, "College created");
        Ok(college)
    }

    pub async fn update_college(&self, id: Id, name: &str, university_id: Id) -> Result<College> {
        let mut college = self.college(id).await?;
        self.university(university_id).await?;
        college.name = clean_name("Name", name, 150)?;
        college.university_id = university_id;
        self.storage.update_college(&college).await?;
        Ok(college)
    }

    pub async fn delete_college(&self, id: Id) -> Result<()> {
        let college = self.college(id).await?;
        if self.storage.count_users_in_college(id).await? > 0 {
            return Err(BazaarError::conflict(format!(
                "Cannot delete {} because users are associated with it",
                college.name
            )));
        }
        self.storage.delete_college(id).await
    }

    // Majors

    pub async fn list_majors(&self, college_id: Option<Id>) -> Result<Vec<Major>> {
        self.storage.list_majors(college_id).await
    }

    pub async fn major(&self, id: Id) -> Result<Major> {
        self.storage.get_major(id).await?.ok_or_else(|| BazaarError::not_found("major"))
    }

    pub async fn create_major(&self, name: &str, college_id: Id) -> Result<Major> {
        let name = clean_name("Name", name, 150)?;
        self.college(college_id).await?;
        self.storage.create_major(&name, college_id).await
    }

    pub async fn update_major(&self, id: Id, name: &str, college_id: Id) -> Result<Major> {
        let mut major = self.major(id).await?;
        self.college(college_id).await?;
        major.name = clean_name("Name", name, 150)?;
        major.college_id = college_id;
        self.storage.update_major(&major).await?;
        Ok(major)
    }

    pub async fn delete_major(&self, id: Id) -> Result<()> {
        self.storage.delete_major(id).await
    }

    // Categories

    pub async fn list_categories(&self, search: Option<String>, page: Option<i64>) -> Result<Page<CategorySummary>> {
        self.storage
            .list_categories(&SearchFilter { search, parent_id: None, page: self.admin_page(page) })
            .await
    }

    pub async fn all_categories(&self) -> Result<Vec<Category>> {
        self.storage.all_categories().await
    }

    pub async fn category(&self, id: Id) -> Result<Category> {
        self.storage.get_category(id).await?.ok_or_else(|| BazaarError::not_found("category"))
    }

    pub async fn create_category(&self, name: &str) -> Result<Category> {
        let name = clean_name("Name", name, 100)?;
        self.storage.create_category(&name).await
    }

    pub async fn update_category(&self, id: Id, name: &str) -> Result<Category> {
        let mut category = self.category(id).await?;
        category.name = clean_name("Name", name, 100)?;
        self.storage.update_category(&category).await?;
        Ok(category)
    }

    pub async fn delete_category(&self, id: Id) -> Result<()> {
        let category = self.category(id).await?;
        if self.storage.count_products_in_category(id).await? > 0 {
            return Err(BazaarError::conflict(format!(
                "Cannot delete {} because products are associated with it",
                category.name
            )));
        }
        self.storage.delete_category(id).await
    }
}
