use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Content workflow the portal asks clients to approve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
  #[serde(rename = "keywords")]
  Keywords,
  #[serde(rename = "briefs")]
  Briefs,
  #[serde(rename = "articles")]
  Articles,
  #[serde(rename = "backlinks")]
  Backlinks,
  #[serde(rename = "quickwins")]
  QuickWins,
  #[serde(rename = "youtube-topics")]
  YoutubeTopics,
  #[serde(rename = "youtube-thumbnails")]
  YoutubeThumbnails,
  #[serde(rename = "reddit-threads")]
  RedditThreads,
}

impl ResourceType {
  pub const ALL: [ResourceType; 8] = [
    ResourceType::Keywords,
    ResourceType::Briefs,
    ResourceType::Articles,
    ResourceType::Backlinks,
    ResourceType::QuickWins,
    ResourceType::YoutubeTopics,
    ResourceType::YoutubeThumbnails,
    ResourceType::RedditThreads,
  ];

  /// Value of the `type` query parameter
  pub fn as_str(&self) -> &'static str {
    match self {
      ResourceType::Keywords => "keywords",
      ResourceType::Briefs => "briefs",
      ResourceType::Articles => "articles",
      ResourceType::Backlinks => "backlinks",
      ResourceType::QuickWins => "quickwins",
      ResourceType::YoutubeTopics => "youtube-topics",
      ResourceType::YoutubeThumbnails => "youtube-thumbnails",
      ResourceType::RedditThreads => "reddit-threads",
    }
  }
}

impl fmt::Display for ResourceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ResourceType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let wanted = s.trim().to_lowercase();
    ResourceType::ALL
      .into_iter()
      .find(|r| r.as_str() == wanted)
      .ok_or_else(|| format!("unknown content type '{}'", s))
  }
}

/// Canonical workflow status of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
  NotStarted,
  InProgress,
  AwaitingApproval,
  ChangesRequested,
  Approved,
  Published,
}

impl ApprovalStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      ApprovalStatus::NotStarted => "not_started",
      ApprovalStatus::InProgress => "in_progress",
      ApprovalStatus::AwaitingApproval => "awaiting_approval",
      ApprovalStatus::ChangesRequested => "changes_requested",
      ApprovalStatus::Approved => "approved",
      ApprovalStatus::Published => "published",
    }
  }

  /// Map one of the store's many status labels onto a canonical status.
  ///
  /// Matching ignores case, spaces, dashes and underscores.
  pub fn from_label(label: &str) -> Option<Self> {
    let normalized: String = label
      .chars()
      .filter(|c| !matches!(c, ' ' | '-' | '_'))
      .flat_map(char::to_lowercase)
      .collect();

    let status = match normalized.as_str() {
      "notstarted" | "todo" | "new" | "backlog" | "" => ApprovalStatus::NotStarted,
      "inprogress" | "writing" | "indraft" | "draft" | "inreview" | "editing" | "researching" => {
        ApprovalStatus::InProgress
      }
      "awaitingapproval" | "awaitingclientapproval" | "pendingapproval" | "clientreview"
      | "readyforreview" | "pending" => ApprovalStatus::AwaitingApproval,
      "changesrequested" | "needsrevision" | "revisionsrequested" | "rejected" => {
        ApprovalStatus::ChangesRequested
      }
      "approved" | "clientapproved" | "approvedbyclient" => ApprovalStatus::Approved,
      "published" | "live" | "completed" | "done" => ApprovalStatus::Published,
      _ => return None,
    };
    Some(status)
  }

  pub fn group(&self) -> StatusGroup {
    match self {
      ApprovalStatus::NotStarted => StatusGroup::NotStarted,
      ApprovalStatus::InProgress => StatusGroup::InProgress,
      ApprovalStatus::AwaitingApproval => StatusGroup::AwaitingApproval,
      ApprovalStatus::ChangesRequested => StatusGroup::ChangesRequested,
      ApprovalStatus::Approved | ApprovalStatus::Published => StatusGroup::Approved,
    }
  }
}

impl fmt::Display for ApprovalStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ApprovalStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    ApprovalStatus::from_label(s).ok_or_else(|| format!("unknown status '{}'", s))
  }
}

/// Bucket a tab is subdivided into, each paginated on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatusGroup {
  NotStarted,
  InProgress,
  AwaitingApproval,
  ChangesRequested,
  Approved,
}

impl StatusGroup {
  pub const ALL: [StatusGroup; 5] = [
    StatusGroup::NotStarted,
    StatusGroup::InProgress,
    StatusGroup::AwaitingApproval,
    StatusGroup::ChangesRequested,
    StatusGroup::Approved,
  ];

  pub fn label(&self) -> &'static str {
    match self {
      StatusGroup::NotStarted => "Not started",
      StatusGroup::InProgress => "In progress",
      StatusGroup::AwaitingApproval => "Awaiting approval",
      StatusGroup::ChangesRequested => "Changes requested",
      StatusGroup::Approved => "Approved",
    }
  }
}

impl FromStr for StatusGroup {
  type Err = String;

  /// Any status label names the group it belongs to.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    ApprovalStatus::from_label(s)
      .map(|status| status.group())
      .ok_or_else(|| format!("unknown status group: {}", s))
  }
}

/// Type-specific attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemDetails {
  Keyword {
    volume: Option<u64>,
    difficulty: Option<u64>,
  },
  Brief {
    target_keyword: Option<String>,
    due_date: Option<String>,
  },
  Article {
    word_count: Option<u64>,
    url: Option<String>,
  },
  Backlink {
    domain: Option<String>,
    domain_rating: Option<u64>,
  },
  QuickWin {
    page_url: Option<String>,
    current_position: Option<u64>,
  },
  YoutubeTopic {
    channel: Option<String>,
  },
  YoutubeThumbnail {
    image_url: Option<String>,
  },
  RedditThread {
    subreddit: Option<String>,
    upvotes: Option<u64>,
  },
}

/// One content-workflow unit awaiting (or past) client approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalItem {
  pub id: String,
  pub display_name: String,
  pub status: ApprovalStatus,
  pub last_updated: Option<String>,
  pub client_ids: BTreeSet<String>,
  pub details: ItemDetails,
}

/// Total item count as reported upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "count", rename_all = "snake_case")]
pub enum ItemCount {
  Exact(u64),
  /// Cursor-paginated upstream: at least this many, true total unknown
  AtLeast(u64),
}

impl fmt::Display for ItemCount {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ItemCount::Exact(n) => write!(f, "{}", n),
      ItemCount::AtLeast(n) => write!(f, "{}+", n),
    }
  }
}

/// API-level pagination for one fetched page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
  pub current_page: u32,
  pub total_pages: u32,
  pub total_items: ItemCount,
  pub has_next_page: bool,
  pub has_prev_page: bool,
  /// Cursor for the next page when the upstream is cursor-paginated
  pub next_offset: Option<String>,
}

impl PageInfo {
  /// Zeroed pagination used for the degraded empty page.
  pub fn empty() -> Self {
    Self {
      current_page: 0,
      total_pages: 0,
      total_items: ItemCount::Exact(0),
      has_next_page: false,
      has_prev_page: false,
      next_offset: None,
    }
  }
}

/// One page of items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
  pub items: Vec<ApprovalItem>,
  pub pagination: PageInfo,
}

impl Page {
  pub fn empty() -> Self {
    Self {
      items: Vec::new(),
      pagination: PageInfo::empty(),
    }
  }
}

/// Body of `POST /approvals`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
  #[serde(rename = "type")]
  pub resource: ResourceType,
  pub item_id: String,
  pub status: ApprovalStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub revision_reason: Option<String>,
}
