use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::models::{Group, GroupRole};

impl Database {
    /// Insert the group row and its owner membership in one transaction.
    pub fn create_group(
        &mut self,
        group_id: &str,
        name: &str,
        owner_id: &str,
        now: i64,
    ) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO groups (group_id, name, owner_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![group_id, name, owner_id, now],
        )?;
        tx.execute(
            "INSERT INTO group_members (group_id, user_id, role, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![group_id, owner_id, GroupRole::Owner.as_str(), now],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_group(&self, group_id: &str) -> Result<Option<Group>> {
        let group = self
            .conn()
            .query_row(
                "SELECT group_id, name, owner_id, created_at FROM groups WHERE group_id = ?1",
                params![group_id],
                row_to_group,
            )
            .optional()?;
        Ok(group)
    }

    pub fn insert_member(
        &self,
        group_id: &str,
        user_id: &str,
        role: GroupRole,
        now: i64,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO group_members (group_id, user_id, role, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![group_id, user_id, role.as_str(), now],
        )?;
        Ok(())
    }

    pub fn remove_member(&self, group_id: &str, user_id: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![group_id, user_id],
        )?;
        Ok(())
    }

    pub fn set_member_role(&self, group_id: &str, user_id: &str, role: GroupRole) -> Result<()> {
        self.conn().execute(
            "UPDATE group_members SET role = ?1 WHERE group_id = ?2 AND user_id = ?3",
            params![role.as_str(), group_id, user_id],
        )?;
        Ok(())
    }

    pub fn rename_group(&self, group_id: &str, name: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE groups SET name = ?1 WHERE group_id = ?2",
            params![name, group_id],
        )?;
        Ok(())
    }

    /// Remove the group, its members, its messages and their target rows,
    /// all inside one transaction.
    pub fn dissolve_group(&mut self, group_id: &str) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "DELETE FROM message_targets WHERE message_id IN
             (SELECT message_id FROM messages
              WHERE conversation_type = 'group' AND conversation_id = ?1)",
            params![group_id],
        )?;
        tx.execute(
            "DELETE FROM messages WHERE conversation_type = 'group' AND conversation_id = ?1",
            params![group_id],
        )?;
        tx.execute(
            "DELETE FROM group_members WHERE group_id = ?1",
            params![group_id],
        )?;
        tx.execute("DELETE FROM groups WHERE group_id = ?1", params![group_id])?;
        tx.commit()?;
        Ok(())
    }

    /// `None` means the user is not in the group, as opposed to a backend
    /// failure.
    pub fn member_role(&self, group_id: &str, user_id: &str) -> Result<Option<GroupRole>> {
        let role: Option<String> = self
            .conn()
            .query_row(
                "SELECT role FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                params![group_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(role.as_deref().and_then(GroupRole::from_str))
    }

    pub fn group_members(&self, group_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id FROM group_members WHERE group_id = ?1")?;
        let rows = stmt.query_map(params![group_id], |row| row.get(0))?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        group_id: row.get(0)?,
        name: row.get(1)?,
        owner_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}
