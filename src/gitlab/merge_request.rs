use super::RequestId;
use super::utils::opt_string;

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct User {
    pub name: String,
    /// GitLab sends `null` for users without an avatar.
    #[serde(default, deserialize_with = "opt_string")]
    pub avatar_url: String,
}

/// An open merge request of one project.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct MergeRequest {
    /// Instance-wide id.
    pub id: RequestId,
    /// Project-local id, used to address the request inside its project.
    pub iid: u64,
    pub title: String,
    pub author: User,
    pub web_url: String,
    /// Number of user (non-system) notes.
    #[serde(rename = "user_notes_count", default)]
    pub comment_count: u32,
}

/// Response of `GET /projects/:id/merge_requests/:iid/approvals`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct Approvals {
    #[serde(default)]
    pub approvals_required: Option<u32>,
    #[serde(default)]
    pub approvals_left: Option<u32>,
    #[serde(default)]
    pub approved_by: Vec<ApprovedBy>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ApprovedBy {
    pub user: User,
}

impl Approvals {
    /// The approving users, in the order GitLab lists them.
    pub fn approvers(self) -> Vec<User> {
        self.approved_by.into_iter().map(|a| a.user).collect()
    }
}
