use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row};

use super::*;
use crate::domain::*;
use crate::storage::AcademicStore;

fn university_from_row(row: &Row<'_>) -> rusqlite::Result<University> {
    Ok(University { id: row.get("id")?, name: row.get("name")?, location: row.get("location")? })
}

fn college_from_row(row: &Row<'_>) -> rusqlite::Result<College> {
    Ok(College { id: row.get("id")?, name: row.get("name")?, university_id: row.get("university_id")? })
}

fn major_from_row(row: &Row<'_>) -> rusqlite::Result<Major> {
    Ok(Major { id: row.get("id")?, name: row.get("name")?, college_id: row.get("college_id")? })
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category { id: row.get("id")?, name: row.get("name")? })
}

fn count(conn: &Connection, sql: &str, id: Id) -> Result<i64> {
    Ok(conn.query_row(sql, params![id], |row| row.get(0))?)
}

#[async_trait]
impl AcademicStore for SqliteStorage {
    async fn create_university(&self, name: &str, location: &str) -> Result<University> {
        self.with_conn(|conn| {
            conn.execute("INSERT INTO universities (name, location) VALUES (?1, ?2)", params![name, location])
                .map_err(|e| unique_violation(e, "a university with this name already exists"))?;
            Ok(University { id: conn.last_insert_rowid(), name: name.to_string(), location: location.to_string() })
        })
    }

    async fn get_university(&self, id: Id) -> Result<Option<University>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT id, name, location FROM universities WHERE id = ?1", params![id], university_from_row)
                .optional()?)
        })
    }

    async fn find_university_by_name(&self, name: &str) -> Result<Option<University>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, location FROM universities WHERE name = ?1",
                    params![name.trim()],
                    university_from_row,
                )
                .optional()?)
        })
    }

    async fn update_university(&self, university: &University) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE universities SET name = ?1, location = ?2 WHERE id = ?3",
                    params![university.name, university.location, university.id],
                )
                .map_err(|e| unique_violation(e, "a university with this name already exists"))?;
            expect_row(changed, "university")
        })
    }

    async fn delete_university(&self, id: Id) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM universities WHERE id = ?1", params![id])?;
            expect_row(changed, "university")
        })
    }

    async fn list_universities(&self, filter: &SearchFilter) -> Result<Page<UniversitySummary>> {
        self.with_conn(|conn| {
            let mut cond = Conditions::new();
            if let Some(term) = non_empty(&filter.search) {
                let pattern = like_pattern(term);
                cond.push("(lower(un.name) LIKE ? ESCAPE '\\' OR lower(un.location) LIKE ? ESCAPE '\\')")
                    .bind(pattern.clone())
                    .bind(pattern);
            }
            let select = "SELECT un.id, un.name, un.location,
                 (SELECT COUNT(*) FROM colleges c WHERE c.university_id = un.id) AS college_count,
                 (SELECT COUNT(*) FROM users u WHERE u.university_id = un.id) AS user_count";
            let from_where = format!("FROM universities un{}", cond.where_sql());
            paged_query(conn, select, &from_where, "ORDER BY un.name", &cond, filter.page, |row| {
                Ok(UniversitySummary {
                    university: university_from_row(row)?,
                    college_count: row.get("college_count")?,
                    user_count: row.get("user_count")?,
                })
            })
        })
    }

    async fn all_universities(&self) -> Result<Vec<University>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, location FROM universities ORDER BY name")?;
            let rows = stmt.query_map([], university_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    async fn count_users_in_university(&self, id: Id) -> Result<i64> {
        self.with_conn(|conn| count(conn, "SELECT COUNT(*) FROM users WHERE university_id = ?1", id))
    }

    async fn create_college(&self, name: &str, university_id: Id) -> Result<College> {
        self.with_conn(|conn| {
            conn.execute("INSERT INTO colleges (name, university_id) VALUES (?1, ?2)", params![name, university_id])
                .map_err(|e| unique_violation(e, "this university already has a college with that name"))?;
            Ok(College { id: conn.last_insert_rowid(), name: name.to_string(), university_id })
        })
    }

    async fn get_college(&self, id: Id) -> Result<Option<College>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT id, name, university_id FROM colleges WHERE id = ?1", params![id], college_from_row)
                .optional()?)
        })
    }

    async fn update_college(&self, college: &College) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE colleges SET name = ?1, university_id = ?2 WHERE id = ?3",
                    params![college.name, college.university_id, college.id],
                )
                .map_err(|e| unique_violation(e, "this university already has a college with that name"))?;
            expect_row(changed, "college")
        })
    }

    async fn delete_college(&self, id: Id) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM colleges WHERE id = ?1", params![id])?;
            expect_row(changed, "college")
        })
    }

    async fn list_colleges(&self, filter: &SearchFilter) -> Result<Page<CollegeSummary>> {
        self.with_conn(|conn| {
            let mut cond = Conditions::new();
            if let Some(term) = non_empty(&filter.search) {
                cond.push("lower(c.name) LIKE ? ESCAPE '\\'").bind(like_pattern(term));
            }
            if let Some(university_id) = filter.parent_id {
                cond.push("c.university_id = ?").bind(university_id);
            }
            let select = "SELECT c.id, c.name, c.university_id, un.name AS university_name,
                 (SELECT COUNT(*) FROM majors m WHERE m.college_id = c.id) AS major_count,
                 (SELECT COUNT(*) FROM users u WHERE u.college_id = c.id) AS user_count";
            let from_where = format!("FROM colleges c JOIN universities un ON un.id = c.university_id{}", cond.where_sql());
            paged_query(conn, select, &from_where, "ORDER BY un.name, c.name", &cond, filter.page, |row| {
                Ok(CollegeSummary {
                    college: college_from_row(row)?,
                    university_name: row.get("university_name")?,
                    major_count: row.get("major_count")?,
                    user_count: row.get("user_count")?,
                })
            })
        })
    }

    async fn colleges_for_university(&self, university_id: Id) -> Result<Vec<College>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, university_id FROM colleges WHERE university_id = ?1 ORDER BY name")?;
            let rows = stmt
                .query_map(params![university_id], college_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    async fn count_users_in_college(&self, id: Id) -> Result<i64> {
        self.with_conn(|conn| count(conn, "SELECT COUNT(*) FROM users WHERE college_id = ?1", id))
    }

    async fn create_major(&self, name: &str, college_id: Id) -> Result<Major> {
        self.with_conn(|conn| {
            conn.execute("INSERT INTO majors (name, college_id) VALUES (?1, ?2)", params![name, college_id])?;
            Ok(Major { id: conn.last_insert_rowid(), name: name.to_string(), college_id })
        })
    }

    async fn get_major(&self, id: Id) -> Result<Option<Major>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT id, name, college_id FROM majors WHERE id = ?1", params![id], major_from_row)
                .optional()?)
        })
    }

    async fn update_major(&self, major: &Major) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE majors SET name = ?1, college_id = ?2 WHERE id = ?3",
                params![major.name, major.college_id, major.id],
            )?;
            expect_row(changed, "major")
        })
    }

    async fn delete_major(&self, id: Id) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM majors WHERE id = ?1", params![id])?;
            expect_row(changed, "major")
        })
    }

    async fn list_majors(&self, college_id: Option<Id>) -> Result<Vec<Major>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, college_id FROM majors WHERE (?1 IS NULL OR college_id = ?1) ORDER BY name",
            )?;
            let rows = stmt.query_map(params![college_id], major_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    async fn create_category(&self, name: &str) -> Result<Category> {
        self.with_conn(|conn| {
            conn.execute("INSERT INTO categories (name) VALUES (?1)", params![name])
                .map_err(|e| unique_violation(e, "a category with this name already exists"))?;
            Ok(Category { id: conn.last_insert_rowid(), name: name.to_string() })
        })
    }

    async fn get_category(&self, id: Id) -> Result<Option<Category>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT id, name FROM categories WHERE id = ?1", params![id], category_from_row)
                .optional()?)
        })
    }

    async fn update_category(&self, category: &Category) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn
                .execute("UPDATE categories SET name = ?1 WHERE id = ?2", params![category.name, category.id])
                .map_err(|e| unique_violation(e, "a category with this name already exists"))?;
            expect_row(changed, "category")
        })
    }

    async fn delete_category(&self, id: Id) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM categories WHERE id = ?1", params![id])?;
            expect_row(changed, "category")
        })
    }

    async fn list_categories(&self, filter: &SearchFilter) -> Result<Page<CategorySummary>> {
        self.with_conn(|conn| {
            let mut cond = Conditions::new();
            if let Some(term) = non_empty(&filter.search) {
                cond.push("lower(c.name) LIKE ? ESCAPE '\\'").bind(like_pattern(term));
            }
            let select = "SELECT c.id, c.name, (SELECT COUNT(*) FROM products p WHERE p.category_id = c.id) AS product_count";
            let from_where = format!("FROM categories c{}", cond.where_sql());
            paged_query(conn, select, &from_where, "ORDER BY c.name", &cond, filter.page, |row| {
                Ok(CategorySummary { category: category_from_row(row)?, product_count: row.get("product_count")? })
            })
        })
    }

    async fn all_categories(&self) -> Result<Vec<Category>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name FROM categories ORDER BY name")?;
            let rows = stmt.query_map([], category_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    async fn count_products_in_category(&self, id: Id) -> Result<i64> {
        self.with_conn(|conn| count(conn, "SELECT COUNT(*) FROM products WHERE category_id = ?1", id))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn university_delete_cascades_to_colleges_and_majors() {
        let store = storage();
        let uni = store.create_university("Cairo University", "Giza").await.unwrap();
        let college = store.create_college("Engineering", uni.id).await.unwrap();
        let major = store.create_major("Computer Engineering", college.id).await.unwrap();

        store.delete_university(uni.id).await.unwrap();
        assert!(store.get_college(college.id).await.unwrap().is_none());
        assert!(store.get_major(major.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn college_names_are_unique_per_university() {
        let store = storage();
        let a = store.create_university("Ain Shams", "Cairo").await.unwrap();
        let b = store.create_university("Alexandria", "Alexandria").await.unwrap();
        store.create_college("Medicine", a.id).await.unwrap();
        store.create_college("Medicine", b.id).await.unwrap();
        let err = store.create_college("medicine", a.id).await.unwrap_err();
        assert!(matches!(err, BazaarError::Conflict(_)));
    }

    #[tokio::test]
    async fn university_list_counts_children() {
        let store = storage();
        let uni = store.create_university("Helwan", "Cairo").await.unwrap();
        store.create_college("Arts", uni.id).await.unwrap();
        store.create_college("Science", uni.id).await.unwrap();
        store.create_university("Mansoura", "Dakahlia").await.unwrap();

        let page = store
            .list_universities(&SearchFilter {
                search: Some("cairo".into()),
                page: Some(PageRequest::new(Some(1), Some(20), 20)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.items[0].college_count, 2);
        assert_eq!(page.items[0].user_count, 0);
    }

    #[tokio::test]
    async fn category_product_counts() {
        let store = storage();
        let owner = user(&store, "owner@uni.edu").await;
        let books = category(&store, "Books").await;
        category(&store, "Electronics").await;
        product(&store, owner.id, books.id, "Calculus", 1500).await;

        assert_eq!(store.count_products_in_category(books.id).await.unwrap(), 1);
        let page = store.list_categories(&SearchFilter::default()).await.unwrap();
        let counts: Vec<_> = page.items.iter().map(|c| (c.category.name.as_str(), c.product_count)).collect();
        assert_eq!(counts, vec![("Books", 1), ("Electronics", 0)]);
    }

    #[tokio::test]
    async fn majors_filter_by_college() {
        let store = storage();
        let uni = store.create_university("AUC", "New Cairo").await.unwrap();
        let eng = store.create_college("Engineering", uni.id).await.unwrap();
        let bus = store.create_college("Business", uni.id).await.unwrap();
        store.create_major("Mechanical", eng.id).await.unwrap();
        store.create_major("Finance", bus.id).await.unwrap();

        assert_eq!(store.list_majors(None).await.unwrap().len(), 2);
        let eng_majors = store.list_majors(Some(eng.id)).await.unwrap();
        assert_eq!(eng_majors.len(), 1);
        assert_eq!(eng_majors[0].name, "Mechanical");
    }
}
