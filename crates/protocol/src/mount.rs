//! File mount records and the query types used to list them.

use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Identifier of a file mount record.
pub type MountId = u64;

/// Identifier of a managed machine.
pub type MachineId = u64;

/// What the mount root points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    /// The root is a directory; operations browse beneath it.
    Directory,
    /// The root is a single file.
    File,
}

/// A configured, path-rooted view into a machine's filesystem.
///
/// `path` is the authorization boundary: every path an operation touches must
/// equal it or lie beneath it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMount {
    pub id: MountId,
    pub machine_id: MachineId,
    pub name: String,
    /// Root path of the mount.
    pub path: String,
    pub kind: Option<MountKind>,
    pub creator: Option<String>,
    pub creator_id: Option<u64>,
    pub modifier: Option<String>,
    pub modifier_id: Option<u64>,
    pub create_time: SystemTime,
    pub update_time: SystemTime,
}

/// Fields supplied when creating or updating a mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMount {
    pub machine_id: MachineId,
    pub name: String,
    pub path: String,
    pub kind: Option<MountKind>,
    /// Who is making the change, recorded in the audit fields.
    pub operator: Option<String>,
    pub operator_id: Option<u64>,
}

impl FileMount {
    /// Build a new record from creation input.
    pub fn from_new(id: MountId, new: NewMount) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            machine_id: new.machine_id,
            name: new.name,
            path: new.path,
            kind: new.kind,
            creator: new.operator.clone(),
            creator_id: new.operator_id,
            modifier: new.operator,
            modifier_id: new.operator_id,
            create_time: now,
            update_time: now,
        }
    }

    /// Apply an update, keeping id and creation audit fields.
    pub fn apply_update(&mut self, update: NewMount) {
        self.machine_id = update.machine_id;
        self.name = update.name;
        self.path = update.path;
        self.kind = update.kind;
        self.modifier = update.operator;
        self.modifier_id = update.operator_id;
        self.update_time = SystemTime::now();
    }

    /// Return only the requested fields as a JSON object.
    ///
    /// An empty field list selects every field.
    pub fn project(&self, fields: &[MountField]) -> serde_json::Map<String, serde_json::Value> {
        let mut all = match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        if fields.is_empty() {
            return all;
        }
        fields
            .iter()
            .filter_map(|f| {
                let key = f.as_str();
                all.remove(key).map(|v| (key.to_string(), v))
            })
            .collect()
    }
}

/// A selectable column of a mount record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountField {
    Id,
    MachineId,
    Name,
    Path,
    Kind,
    Creator,
    CreatorId,
    Modifier,
    ModifierId,
    CreateTime,
    UpdateTime,
}

impl MountField {
    /// Serialized (camelCase) name of the field.
    pub fn as_str(&self) -> &'static str {
        match self {
            MountField::Id => "id",
            MountField::MachineId => "machineId",
            MountField::Name => "name",
            MountField::Path => "path",
            MountField::Kind => "kind",
            MountField::Creator => "creator",
            MountField::CreatorId => "creatorId",
            MountField::Modifier => "modifier",
            MountField::ModifierId => "modifierId",
            MountField::CreateTime => "createTime",
            MountField::UpdateTime => "updateTime",
        }
    }
}

impl FromStr for MountField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let field = match s.trim().to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "id" => MountField::Id,
            "machineid" => MountField::MachineId,
            "name" => MountField::Name,
            "path" => MountField::Path,
            "kind" | "type" => MountField::Kind,
            "creator" => MountField::Creator,
            "creatorid" => MountField::CreatorId,
            "modifier" => MountField::Modifier,
            "modifierid" => MountField::ModifierId,
            "createtime" => MountField::CreateTime,
            "updatetime" => MountField::UpdateTime,
            other => return Err(format!("unknown mount field: {other}")),
        };
        Ok(field)
    }
}

/// Filter for paged mount queries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountFilter {
    pub machine_id: Option<MachineId>,
    /// Case-insensitive substring match on the mount name.
    pub name: Option<String>,
    pub kind: Option<MountKind>,
}

impl MountFilter {
    /// Check whether a record satisfies this filter.
    pub fn matches(&self, mount: &FileMount) -> bool {
        if let Some(machine_id) = self.machine_id {
            if mount.machine_id != machine_id {
                return false;
            }
        }
        if let Some(ref name) = self.name {
            if !mount.name.to_lowercase().contains(&name.to_lowercase()) {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if mount.kind != Some(kind) {
                return false;
            }
        }
        true
    }
}

/// Default number of records per page.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Page selector. `page_num` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageParam {
    pub page_num: usize,
    pub page_size: usize,
}

impl Default for PageParam {
    fn default() -> Self {
        Self {
            page_num: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageParam {
    /// Number of records to skip.
    pub fn offset(&self) -> usize {
        (self.page_num.max(1) - 1).saturating_mul(self.page_size)
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Total number of matching records across all pages.
    pub total: usize,
    pub list: Vec<T>,
}

impl<T> Page<T> {
    /// Slice an already filtered and ordered result set.
    pub fn from_sorted(items: Vec<T>, page: &PageParam) -> Self {
        let total = items.len();
        let list = items
            .into_iter()
            .skip(page.offset())
            .take(page.page_size)
            .collect();
        Self { total, list }
    }
}
