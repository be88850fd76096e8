use crate::{Error, Result};

/// An Azure cloud environment.
///
/// The pipeline can run against the public cloud or one of the sovereign
/// clouds; each carries its own authority host, storage endpoint suffix,
/// and OAuth scopes. The table is bundled rather than discovered because
/// the set of clouds changes on the order of years.
///
/// # Examples
///
/// ```
/// use stacforge_store::Cloud;
///
/// let cloud = Cloud::from_name("AzureCloud").unwrap();
/// assert_eq!(cloud.storage_suffix, "core.windows.net");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cloud {
    /// The cloud name, as reported by `az cloud list`.
    pub name: &'static str,

    /// The Microsoft Entra authority host.
    pub authority: &'static str,

    /// The storage endpoint suffix, e.g. `core.windows.net`.
    pub storage_suffix: &'static str,

    /// The OAuth scope for storage access.
    pub storage_scope: &'static str,

    /// The OAuth scope for the geospatial catalog, if the cloud has one.
    pub catalog_scope: Option<&'static str>,
}

const CLOUDS: &[Cloud] = &[
    Cloud {
        name: "AzureCloud",
        authority: "https://login.microsoftonline.com",
        storage_suffix: "core.windows.net",
        storage_scope: "https://storage.azure.com/.default",
        catalog_scope: Some("https://geocatalog.spatio.azure.com/.default"),
    },
    Cloud {
        name: "AzureUSGovernment",
        authority: "https://login.microsoftonline.us",
        storage_suffix: "core.usgovcloudapi.net",
        storage_scope: "https://storage.azure.us/.default",
        catalog_scope: None,
    },
    Cloud {
        name: "AzureChinaCloud",
        authority: "https://login.chinacloudapi.cn",
        storage_suffix: "core.chinacloudapi.cn",
        storage_scope: "https://storage.azure.cn/.default",
        catalog_scope: None,
    },
];

impl Cloud {
    /// Returns the cloud with the given name.
    pub fn from_name(name: &str) -> Result<Cloud> {
        CLOUDS
            .iter()
            .find(|cloud| cloud.name == name)
            .copied()
            .ok_or_else(|| Error::UnknownCloud(name.to_string()))
    }

    /// Returns the cloud selected by the `AZURE_CLOUD` environment
    /// variable, defaulting to the public cloud.
    pub fn from_env() -> Result<Cloud> {
        match std::env::var("AZURE_CLOUD") {
            Ok(name) => Cloud::from_name(&name),
            Err(_) => Cloud::from_name("AzureCloud"),
        }
    }

    /// Returns the catalog scope, or an error if this cloud has none.
    pub fn catalog_scope(&self) -> Result<&'static str> {
        self.catalog_scope.ok_or(Error::MissingScope("catalog"))
    }

    /// Returns the blob endpoint for an account in this cloud.
    pub fn blob_endpoint(&self, account: &str) -> String {
        format!("https://{}.blob.{}", account, self.storage_suffix)
    }

    /// Returns the table endpoint for an account in this cloud.
    pub fn table_endpoint(&self, account: &str) -> String {
        format!("https://{}.table.{}", account, self.storage_suffix)
    }
}

impl Default for Cloud {
    fn default() -> Self {
        CLOUDS[0]
    }
}

#[cfg(test)]
mod tests {
    use super::Cloud;

    #[test]
    fn from_name() {
        let cloud = Cloud::from_name("AzureChinaCloud").unwrap();
        assert_eq!(cloud.storage_suffix, "core.chinacloudapi.cn");
        assert!(cloud.catalog_scope().is_err());
    }

    #[test]
    fn unknown_cloud() {
        assert!(Cloud::from_name("AzureMoonCloud").is_err());
    }

    #[test]
    fn endpoints() {
        let cloud = Cloud::default();
        assert_eq!(
            cloud.blob_endpoint("acct"),
            "https://acct.blob.core.windows.net"
        );
        assert_eq!(
            cloud.table_endpoint("acct"),
            "https://acct.table.core.windows.net"
        );
    }
}
