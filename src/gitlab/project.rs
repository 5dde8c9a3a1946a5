use super::ProjectId;

/// A GitLab project as returned by `GET /projects`.
///
/// Two projects are the same project when their ids match; the other
/// fields are only meaningful for display.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// Example: `https://gitlab.example.com/group/project`
    pub web_url: String,
    #[serde(default)]
    pub namespace: Option<Namespace>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct Namespace {
    pub name: String,
}

impl Project {
    /// `namespace / name`, or just the name for projects without a namespace.
    pub fn display_name(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{} / {}", namespace.name, self.name),
            None => self.name.clone(),
        }
    }
}

impl PartialEq for Project {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Project {}
