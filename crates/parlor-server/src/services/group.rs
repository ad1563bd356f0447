//! Group membership and role rules.
//!
//! Roles: exactly one owner per group, admins below, members below that.
//! The owner can do everything; admins can rename and kick plain members;
//! members can only leave.

use parlor_store::{Database, GroupRole, StoreError};
use thiserror::Error;

use super::{generate_id, now_seconds};

#[derive(Error, Debug)]
pub enum GroupError {
    #[error("group not found")]
    NotFound,

    #[error("user not in group")]
    NotInGroup,

    #[error("user already in group")]
    AlreadyInGroup,

    #[error("owner cannot leave group")]
    OwnerCannotLeave,

    #[error("permission denied")]
    PermissionDenied,

    #[error("cannot kick owner")]
    CannotKickOwner,

    #[error("admin cannot kick another admin")]
    AdminCannotKickAdmin,

    #[error("only owner can dissolve group")]
    OnlyOwnerCanDissolve,

    #[error("only owner can change admin role")]
    OnlyOwnerCanSetAdmin,

    #[error("cannot change owner role")]
    CannotChangeOwnerRole,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Create a group; the creator becomes its owner. Returns the new group id.
pub fn create_group(db: &mut Database, owner_id: &str, name: &str) -> Result<String, GroupError> {
    let group_id = generate_id();
    db.create_group(&group_id, name, owner_id, now_seconds())?;
    Ok(group_id)
}

pub fn join_group(db: &Database, user_id: &str, group_id: &str) -> Result<(), GroupError> {
    if db.get_group(group_id)?.is_none() {
        return Err(GroupError::NotFound);
    }
    if db.member_role(group_id, user_id)?.is_some() {
        return Err(GroupError::AlreadyInGroup);
    }
    db.insert_member(group_id, user_id, GroupRole::Member, now_seconds())?;
    Ok(())
}

pub fn leave_group(db: &Database, user_id: &str, group_id: &str) -> Result<(), GroupError> {
    let role = user_role(db, user_id, group_id)?;
    if role == GroupRole::Owner {
        return Err(GroupError::OwnerCannotLeave);
    }
    db.remove_member(group_id, user_id)?;
    Ok(())
}

pub fn rename_group(
    db: &Database,
    actor_id: &str,
    group_id: &str,
    new_name: &str,
) -> Result<(), GroupError> {
    require_owner_or_admin(db, actor_id, group_id)?;
    db.rename_group(group_id, new_name)?;
    Ok(())
}

pub fn kick_user(
    db: &Database,
    actor_id: &str,
    group_id: &str,
    target_user_id: &str,
) -> Result<(), GroupError> {
    let is_owner = require_owner_or_admin(db, actor_id, group_id)?;
    let target_role = user_role(db, target_user_id, group_id)?;
    if target_role == GroupRole::Owner {
        return Err(GroupError::CannotKickOwner);
    }
    if !is_owner && target_role == GroupRole::Admin {
        return Err(GroupError::AdminCannotKickAdmin);
    }
    db.remove_member(group_id, target_user_id)?;
    Ok(())
}

/// Transactionally removes the group, its members, its messages and their
/// delivery targets.
pub fn dissolve_group(db: &mut Database, actor_id: &str, group_id: &str) -> Result<(), GroupError> {
    let is_owner = require_owner_or_admin(db, actor_id, group_id)?;
    if !is_owner {
        return Err(GroupError::OnlyOwnerCanDissolve);
    }
    db.dissolve_group(group_id)?;
    Ok(())
}

/// Flip a member between admin and member. Owner only; the owner role
/// itself is immutable.
pub fn set_admin(
    db: &Database,
    actor_id: &str,
    group_id: &str,
    target_user_id: &str,
    make_admin: bool,
) -> Result<(), GroupError> {
    let is_owner = require_owner_or_admin(db, actor_id, group_id)?;
    if !is_owner {
        return Err(GroupError::OnlyOwnerCanSetAdmin);
    }
    let target_role = user_role(db, target_user_id, group_id)?;
    if target_role == GroupRole::Owner {
        return Err(GroupError::CannotChangeOwnerRole);
    }
    let role = if make_admin {
        GroupRole::Admin
    } else {
        GroupRole::Member
    };
    db.set_member_role(group_id, target_user_id, role)?;
    Ok(())
}

/// The user's role, or [`GroupError::NotInGroup`], kept distinct from
/// backend failures so handlers can translate it.
pub fn user_role(db: &Database, user_id: &str, group_id: &str) -> Result<GroupRole, GroupError> {
    db.member_role(group_id, user_id)?
        .ok_or(GroupError::NotInGroup)
}

pub fn group_members(db: &Database, group_id: &str) -> Result<Vec<String>, GroupError> {
    Ok(db.group_members(group_id)?)
}

fn require_owner_or_admin(
    db: &Database,
    user_id: &str,
    group_id: &str,
) -> Result<bool, GroupError> {
    match user_role(db, user_id, group_id)? {
        GroupRole::Owner => Ok(true),
        GroupRole::Admin => Ok(false),
        GroupRole::Member => Err(GroupError::PermissionDenied),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(dir.path().join("test.db")).unwrap();
        (db, dir)
    }

    fn group_with_members(db: &mut Database) -> String {
        let group_id = create_group(db, "alice", "rustaceans").unwrap();
        join_group(db, "bob", &group_id).unwrap();
        join_group(db, "carol", &group_id).unwrap();
        group_id
    }

    #[test]
    fn create_assigns_hex_id_and_owner_role() {
        let (mut db, _dir) = test_db();
        let group_id = create_group(&mut db, "alice", "rustaceans").unwrap();
        assert_eq!(group_id.len(), 32);
        assert_eq!(user_role(&db, "alice", &group_id).unwrap(), GroupRole::Owner);
    }

    #[test]
    fn join_rules() {
        let (mut db, _dir) = test_db();
        let group_id = create_group(&mut db, "alice", "rustaceans").unwrap();

        assert!(matches!(
            join_group(&db, "bob", "does-not-exist"),
            Err(GroupError::NotFound)
        ));
        join_group(&db, "bob", &group_id).unwrap();
        assert!(matches!(
            join_group(&db, "bob", &group_id),
            Err(GroupError::AlreadyInGroup)
        ));
    }

    #[test]
    fn owner_cannot_leave_but_member_can() {
        let (mut db, _dir) = test_db();
        let group_id = group_with_members(&mut db);

        assert!(matches!(
            leave_group(&db, "alice", &group_id),
            Err(GroupError::OwnerCannotLeave)
        ));
        leave_group(&db, "bob", &group_id).unwrap();
        assert!(matches!(
            user_role(&db, "bob", &group_id),
            Err(GroupError::NotInGroup)
        ));
    }

    #[test]
    fn rename_requires_owner_or_admin() {
        let (mut db, _dir) = test_db();
        let group_id = group_with_members(&mut db);

        assert!(matches!(
            rename_group(&db, "bob", &group_id, "new-name"),
            Err(GroupError::PermissionDenied)
        ));
        set_admin(&db, "alice", &group_id, "bob", true).unwrap();
        rename_group(&db, "bob", &group_id, "new-name").unwrap();
        assert_eq!(db.get_group(&group_id).unwrap().unwrap().name, "new-name");
    }

    #[test]
    fn kick_rules() {
        let (mut db, _dir) = test_db();
        let group_id = group_with_members(&mut db);
        set_admin(&db, "alice", &group_id, "bob", true).unwrap();
        set_admin(&db, "alice", &group_id, "carol", true).unwrap();

        // Admin cannot kick another admin, and nobody can kick the owner.
        assert!(matches!(
            kick_user(&db, "bob", &group_id, "carol"),
            Err(GroupError::AdminCannotKickAdmin)
        ));
        assert!(matches!(
            kick_user(&db, "bob", &group_id, "alice"),
            Err(GroupError::CannotKickOwner)
        ));

        // The owner can kick an admin; an admin can kick a plain member.
        set_admin(&db, "alice", &group_id, "carol", false).unwrap();
        kick_user(&db, "bob", &group_id, "carol").unwrap();
        assert!(matches!(
            user_role(&db, "carol", &group_id),
            Err(GroupError::NotInGroup)
        ));
    }

    #[test]
    fn promote_demote_is_owner_only() {
        let (mut db, _dir) = test_db();
        let group_id = group_with_members(&mut db);
        set_admin(&db, "alice", &group_id, "bob", true).unwrap();

        assert!(matches!(
            set_admin(&db, "bob", &group_id, "carol", true),
            Err(GroupError::OnlyOwnerCanSetAdmin)
        ));
        assert!(matches!(
            set_admin(&db, "alice", &group_id, "alice", false),
            Err(GroupError::CannotChangeOwnerRole)
        ));

        set_admin(&db, "alice", &group_id, "bob", false).unwrap();
        assert_eq!(user_role(&db, "bob", &group_id).unwrap(), GroupRole::Member);
    }

    #[test]
    fn dissolve_is_owner_only() {
        let (mut db, _dir) = test_db();
        let group_id = group_with_members(&mut db);
        set_admin(&db, "alice", &group_id, "bob", true).unwrap();

        assert!(matches!(
            dissolve_group(&mut db, "bob", &group_id),
            Err(GroupError::OnlyOwnerCanDissolve)
        ));
        dissolve_group(&mut db, "alice", &group_id).unwrap();
        assert!(matches!(
            user_role(&db, "alice", &group_id),
            Err(GroupError::NotInGroup)
        ));
        assert!(db.get_group(&group_id).unwrap().is_none());
    }
}
