//! 归属关系图：循环检测与组织树

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use crate::error::{AdminError, Result};
use crate::models::{ProfileStatus, UserRole};

/// 循环检测时向上追溯的最大层数
pub const CYCLE_CHECK_MAX_DEPTH: usize = 50;
/// 上级链和组织树的最大层数
pub const TREE_MAX_DEPTH: usize = 10;

/// 检查把 `shop_id` 挂到 `parent_id` 下是否成环
///
/// `parent_of` 返回某节点当前生效的上级。
pub fn ensure_no_cycle<F>(shop_id: Uuid, parent_id: Uuid, mut parent_of: F) -> Result<()>
where
    F: FnMut(Uuid) -> Option<Uuid>,
{
    if shop_id == parent_id {
        return Err(AdminError::CircularRelationship);
    }

    let mut visited = HashSet::new();
    let mut current = Some(parent_id);
    let mut depth = 0;

    while let Some(node) = current {
        if node == shop_id {
            return Err(AdminError::CircularRelationship);
        }
        if !visited.insert(node) || depth >= CYCLE_CHECK_MAX_DEPTH {
            break;
        }
        depth += 1;
        current = parent_of(node);
    }
    Ok(())
}

/// 从 `start` 向上收集上级链，近者在前
pub fn parent_chain<F>(start: Uuid, mut parent_of: F) -> Vec<Uuid>
where
    F: FnMut(Uuid) -> Option<Uuid>,
{
    let mut chain = Vec::new();
    let mut visited = HashSet::from([start]);
    let mut current = parent_of(start);

    while let Some(node) = current {
        if chain.len() >= TREE_MAX_DEPTH || !visited.insert(node) {
            break;
        }
        chain.push(node);
        current = parent_of(node);
    }
    chain
}

/// 组织树节点
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TreeProfile {
    pub id: Uuid,
    pub name: String,
    pub role: UserRole,
    pub shop_name: String,
    pub status: ProfileStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: Uuid,
    pub name: String,
    pub role: UserRole,
    pub shop_name: String,
    pub status: ProfileStatus,
    pub depth: usize,
    pub children: Vec<TreeNode>,
}

/// 由根节点和 (parent, child) 边构建组织树，每个节点最多出现一次
pub fn build_tree(
    roots: &[Uuid],
    profiles: &HashMap<Uuid, TreeProfile>,
    edges: &[(Uuid, Uuid)],
) -> Vec<TreeNode> {
    let mut children_of: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (parent, child) in edges {
        children_of.entry(*parent).or_default().push(*child);
    }

    let mut visited = HashSet::new();
    roots
        .iter()
        .filter_map(|root| build_node(*root, 0, profiles, &children_of, &mut visited))
        .collect()
}

fn build_node(
    id: Uuid,
    depth: usize,
    profiles: &HashMap<Uuid, TreeProfile>,
    children_of: &HashMap<Uuid, Vec<Uuid>>,
    visited: &mut HashSet<Uuid>,
) -> Option<TreeNode> {
    let profile = profiles.get(&id)?;
    if !visited.insert(id) {
        return None;
    }

    let children = if depth + 1 < TREE_MAX_DEPTH {
        children_of
            .get(&id)
            .map(|kids| {
                kids.iter()
                    .filter_map(|kid| build_node(*kid, depth + 1, profiles, children_of, visited))
                    .collect()
            })
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    Some(TreeNode {
        id,
        name: profile.name.clone(),
        role: profile.role,
        shop_name: profile.shop_name.clone(),
        status: profile.status,
        depth,
        children,
    })
}
