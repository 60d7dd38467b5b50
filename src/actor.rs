use sqlx::PgPool;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{User, UserRole, UserStatus};

/// A caller whose role and account status were checked once at the boundary.
/// Operations take the variant they require instead of re-deriving the role
/// from a user row in every handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Admin(Uuid),
    Teacher(Uuid),
    Student(Uuid),
}

impl Actor {
    pub fn user_id(&self) -> Uuid {
        match *self {
            Actor::Admin(id) | Actor::Teacher(id) | Actor::Student(id) => id,
        }
    }

    pub fn from_user(user: &User) -> Result<Self, LedgerError> {
        if user.status != UserStatus::Approved {
            return Err(LedgerError::Forbidden(format!(
                "account {} is {}",
                user.id, user.status
            )));
        }
        Ok(match user.role {
            UserRole::Admin => Actor::Admin(user.id),
            UserRole::Teacher => Actor::Teacher(user.id),
            UserRole::Student => Actor::Student(user.id),
        })
    }

    pub fn require_admin(&self) -> Result<Uuid, LedgerError> {
        match *self {
            Actor::Admin(id) => Ok(id),
            _ => Err(LedgerError::Forbidden("admin access required".into())),
        }
    }

    pub fn require_teacher(&self) -> Result<Uuid, LedgerError> {
        match *self {
            Actor::Teacher(id) => Ok(id),
            _ => Err(LedgerError::Forbidden("teacher access required".into())),
        }
    }

    pub fn require_student(&self) -> Result<Uuid, LedgerError> {
        match *self {
            Actor::Student(id) => Ok(id),
            _ => Err(LedgerError::Forbidden("student access required".into())),
        }
    }
}

/// Load a user row and collapse it to a role-tagged actor. The authentication
/// collaborator already established who is calling; this only asserts the
/// account is approved and tags the role.
pub async fn resolve(pool: &PgPool, user_id: Uuid) -> Result<Actor, LedgerError> {
    let row = sqlx::query("SELECT * FROM activity_ledger.users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(LedgerError::NotFound("user"))?;

    let user = User::from_row(&row)?;
    Actor::from_user(&user)
}

pub async fn fetch_user(pool: &PgPool, user_id: Uuid) -> Result<User, LedgerError> {
    let row = sqlx::query("SELECT * FROM activity_ledger.users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(LedgerError::NotFound("user"))?;

    User::from_row(&row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(role: UserRole, status: UserStatus) -> User {
        User {
            id: Uuid::new_v4(),
            email: "kiara.patel@example.edu".to_string(),
            full_name: "Kiara Patel".to_string(),
            role,
            status,
            department: None,
            performance_score: 0.0,
            total_credits_earned: 0.0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn approved_users_become_role_tagged_actors() {
        let teacher = user(UserRole::Teacher, UserStatus::Approved);
        let actor = Actor::from_user(&teacher).unwrap();
        assert_eq!(actor, Actor::Teacher(teacher.id));
        assert_eq!(actor.require_teacher().unwrap(), teacher.id);
        assert!(actor.require_admin().is_err());
        assert!(actor.require_student().is_err());
    }

    #[test]
    fn unapproved_accounts_are_rejected_at_the_boundary() {
        let pending = user(UserRole::Student, UserStatus::Pending);
        assert!(matches!(
            Actor::from_user(&pending),
            Err(LedgerError::Forbidden(_))
        ));
        let rejected = user(UserRole::Admin, UserStatus::Rejected);
        assert!(Actor::from_user(&rejected).is_err());
    }
}
