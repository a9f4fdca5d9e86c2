//! Test fixture utilities.

/// Builder for OLAP connection-target strings used in tests.
///
/// Produces `Key=Value;` pairs in a fixed order so that equal fixtures
/// yield byte-identical targets.
#[derive(Debug, Clone)]
pub struct TestTarget {
    /// Server address or XMLA endpoint.
    pub data_source: String,
    /// Catalog (database) name.
    pub catalog: Option<String>,
    /// User name.
    pub user: Option<String>,
    /// Password.
    pub password: Option<String>,
}

impl TestTarget {
    /// Create a target for `data_source`.
    #[must_use]
    pub fn new(data_source: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into(),
            catalog: None,
            user: None,
            password: None,
        }
    }

    /// Set the catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    /// Set the credentials.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Render the connection string.
    #[must_use]
    pub fn connection_string(&self) -> String {
        let mut target = format!("Data Source={};", self.data_source);
        if let Some(catalog) = &self.catalog {
            target.push_str(&format!("Catalog={catalog};"));
        }
        if let Some(user) = &self.user {
            target.push_str(&format!("User ID={user};"));
        }
        if let Some(password) = &self.password {
            target.push_str(&format!("Password={password};"));
        }
        target
    }

    /// `count` distinct targets on the same data source, one catalog each.
    #[must_use]
    pub fn catalogs(data_source: &str, count: usize) -> Vec<String> {
        (1..=count)
            .map(|n| {
                Self::new(data_source)
                    .with_catalog(format!("Catalog{n}"))
                    .connection_string()
            })
            .collect()
    }
}

impl Default for TestTarget {
    fn default() -> Self {
        Self::new("http://localhost/olap/msmdpump.dll").with_catalog("Adventure Works DW")
    }
}
