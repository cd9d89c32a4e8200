//! 当前用户提取器

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use super::Claims;
use crate::error::AdminError;
use crate::models::UserRole;

/// 由 auth_middleware 注入的当前登录用户
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub role: UserRole,
    pub claims: Claims,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// 仅管理员或本人可访问
    pub fn ensure_self_or_admin(&self, owner_id: Uuid) -> Result<(), AdminError> {
        if self.is_admin() || self.id == owner_id {
            Ok(())
        } else {
            Err(AdminError::Forbidden("无权访问其他用户的数据".to_string()))
        }
    }

    pub fn ensure_admin(&self) -> Result<(), AdminError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AdminError::Forbidden("仅管理员可执行该操作".to_string()))
        }
    }

    /// 非管理员只能查看自己的数据；管理员可指定任意用户
    pub fn scope(&self, requested: Option<Uuid>) -> Option<Uuid> {
        if self.is_admin() {
            requested
        } else {
            Some(self.id)
        }
    }

    /// 解析 KOL 维度查询的目标：非管理员只能查看自己，查看他人返回 403；
    /// 管理员必须显式指定
    pub fn kol_target(&self, requested: Option<Uuid>) -> Result<Uuid, AdminError> {
        match requested {
            Some(id) => {
                self.ensure_self_or_admin(id)?;
                Ok(id)
            }
            None if self.is_admin() => Err(AdminError::Validation("管理员需指定 kolId".to_string())),
            None => Ok(self.id),
        }
    }
}

impl TryFrom<Claims> for CurrentUser {
    type Error = AdminError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        Ok(Self {
            id: claims.user_id()?,
            role: claims.role,
            claims,
        })
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AdminError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = parts
            .extensions
            .get::<Claims>()
            .cloned()
            .ok_or_else(|| AdminError::Unauthorized("未认证".to_string()))?;
        Self::try_from(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProfileStatus;

    pub(crate) fn claims(role: UserRole) -> Claims {
        Claims {
            sub: Uuid::new_v4().to_string(),
            email: "user@biofox.kr".into(),
            name: "user".into(),
            role,
            status: ProfileStatus::Approved,
            iat: 0,
            exp: i64::MAX,
            iss: "biofox-admin".into(),
        }
    }

    #[test]
    fn test_scope() {
        let admin = CurrentUser::try_from(claims(UserRole::Admin)).unwrap();
        let target = Uuid::new_v4();
        assert_eq!(admin.scope(Some(target)), Some(target));
        assert_eq!(admin.scope(None), None);

        let kol = CurrentUser::try_from(claims(UserRole::Kol)).unwrap();
        assert_eq!(kol.scope(Some(target)), Some(kol.id));
        assert!(kol.ensure_self_or_admin(target).is_err());
        assert!(kol.ensure_self_or_admin(kol.id).is_ok());
        assert!(kol.ensure_admin().is_err());
    }

    #[test]
    fn test_kol_target() {
        let kol = CurrentUser::try_from(claims(UserRole::Kol)).unwrap();
        let other = Uuid::new_v4();
        assert_eq!(kol.kol_target(None).unwrap(), kol.id);
        assert_eq!(kol.kol_target(Some(kol.id)).unwrap(), kol.id);
        assert!(matches!(kol.kol_target(Some(other)), Err(AdminError::Forbidden(_))));

        let admin = CurrentUser::try_from(claims(UserRole::Admin)).unwrap();
        assert_eq!(admin.kol_target(Some(other)).unwrap(), other);
        assert!(matches!(admin.kol_target(None), Err(AdminError::Validation(_))));
    }

    #[test]
    fn test_invalid_sub_rejected() {
        let mut c = claims(UserRole::Kol);
        c.sub = "42".into();
        assert!(matches!(CurrentUser::try_from(c), Err(AdminError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_extractor_without_claims() {
        let (mut parts, _) = axum::http::Request::new(()).into_parts();
        let res = CurrentUser::from_request_parts(&mut parts, &()).await;
        assert!(matches!(res, Err(AdminError::Unauthorized(_))));
    }
}
