use crate::error::{AppError, AppResult};
use crate::identity::{Identity, ObjectScope, Role};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    /// Request a lifecycle action on a service.
    Execute,
    Claim,
    Report,
    Poll,
    Ack,
    Lease,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectType {
    Participant,
    Agent,
    AgentType,
    ServiceType,
    ServiceOptionType,
    ServiceOption,
    ServiceGroup,
    Service,
    Job,
    Event,
    EventSubscription,
    ServicePoolSet,
    ServicePool,
    ServicePoolValue,
    MetricType,
    MetricEntry,
    Token,
    VaultSecret,
}

struct Rule {
    roles: &'static [Role],
    action: Action,
    object: ObjectType,
}

const ADMIN: &[Role] = &[Role::Admin];
const ADMIN_PARTICIPANT: &[Role] = &[Role::Admin, Role::Participant];
const EVERYONE: &[Role] = &[Role::Admin, Role::Participant, Role::Agent];

macro_rules! rule {
    ($roles:expr, $action:ident, $object:ident) => {
        Rule {
            roles: $roles,
            action: Action::$action,
            object: ObjectType::$object,
        }
    };
}

/// The static authorization table. A request is allowed iff a rule matches
/// its action and object type and the caller holds one of the rule's roles;
/// the object scope (when supplied) must additionally be visible to the
/// caller per the identity scope predicate.
static RULES: &[Rule] = &[
    // Catalog entries: everyone reads, admins administer.
    rule!(EVERYONE, Read, AgentType),
    rule!(ADMIN, Create, AgentType),
    rule!(ADMIN, Update, AgentType),
    rule!(ADMIN, Delete, AgentType),
    rule!(EVERYONE, Read, ServiceType),
    rule!(ADMIN, Create, ServiceType),
    rule!(ADMIN, Update, ServiceType),
    rule!(ADMIN, Delete, ServiceType),
    rule!(EVERYONE, Read, ServiceOptionType),
    rule!(ADMIN, Create, ServiceOptionType),
    rule!(ADMIN, Update, ServiceOptionType),
    rule!(ADMIN, Delete, ServiceOptionType),
    rule!(EVERYONE, Read, ServiceOption),
    rule!(ADMIN, Create, ServiceOption),
    rule!(ADMIN, Update, ServiceOption),
    rule!(ADMIN, Delete, ServiceOption),
    rule!(ADMIN, Create, MetricType),
    rule!(EVERYONE, Read, MetricType),
    rule!(ADMIN, Delete, MetricType),
    // Participants are administered externally; tenants may read themselves.
    rule!(ADMIN, Create, Participant),
    rule!(ADMIN_PARTICIPANT, Read, Participant),
    rule!(ADMIN, Update, Participant),
    rule!(ADMIN, Delete, Participant),
    // Providers manage their agents; agents update their own status.
    rule!(ADMIN_PARTICIPANT, Create, Agent),
    rule!(EVERYONE, Read, Agent),
    rule!(EVERYONE, Update, Agent),
    rule!(ADMIN_PARTICIPANT, Delete, Agent),
    // Consumers manage groups and services.
    rule!(ADMIN_PARTICIPANT, Create, ServiceGroup),
    rule!(ADMIN_PARTICIPANT, Read, ServiceGroup),
    rule!(ADMIN_PARTICIPANT, Update, ServiceGroup),
    rule!(ADMIN_PARTICIPANT, Delete, ServiceGroup),
    rule!(ADMIN_PARTICIPANT, Create, Service),
    rule!(EVERYONE, Read, Service),
    rule!(ADMIN_PARTICIPANT, Update, Service),
    rule!(ADMIN_PARTICIPANT, Execute, Service),
    rule!(ADMIN_PARTICIPANT, Delete, Service),
    // Jobs flow to agents.
    rule!(EVERYONE, Read, Job),
    rule!(&[Role::Agent], Claim, Job),
    rule!(&[Role::Agent], Report, Job),
    // Event log and subscriptions.
    rule!(ADMIN_PARTICIPANT, Read, Event),
    rule!(ADMIN, Read, EventSubscription),
    rule!(ADMIN, Lease, EventSubscription),
    rule!(ADMIN, Poll, EventSubscription),
    rule!(ADMIN, Ack, EventSubscription),
    // Pools are provider-scoped, administered by admins.
    rule!(ADMIN_PARTICIPANT, Read, ServicePoolSet),
    rule!(ADMIN, Create, ServicePoolSet),
    rule!(ADMIN, Update, ServicePoolSet),
    rule!(ADMIN, Delete, ServicePoolSet),
    rule!(ADMIN_PARTICIPANT, Read, ServicePool),
    rule!(ADMIN, Create, ServicePool),
    rule!(ADMIN, Update, ServicePool),
    rule!(ADMIN, Delete, ServicePool),
    rule!(ADMIN_PARTICIPANT, Read, ServicePoolValue),
    rule!(ADMIN, Create, ServicePoolValue),
    rule!(ADMIN, Delete, ServicePoolValue),
    // Metric entries are a write-only sink for agents; only admins page it.
    rule!(&[Role::Admin, Role::Agent], Create, MetricEntry),
    rule!(ADMIN, Read, MetricEntry),
    // Tokens and vault secrets are admin-only surfaces.
    rule!(ADMIN, Create, Token),
    rule!(ADMIN, Read, Token),
    rule!(ADMIN, Delete, Token),
    rule!(ADMIN, Create, VaultSecret),
    rule!(ADMIN, Read, VaultSecret),
    rule!(ADMIN, Delete, VaultSecret),
];

/// Authorizes `action` on `object` for the caller. When `scope` is given the
/// object's ownership must also be visible to the caller.
pub fn authorize(
    identity: &Identity,
    action: Action,
    object: ObjectType,
    scope: Option<&ObjectScope>,
) -> AppResult<()> {
    let role_allowed = RULES.iter().any(|rule| {
        rule.action == action && rule.object == object && rule.roles.contains(&identity.role)
    });
    if !role_allowed {
        return Err(AppError::Forbidden);
    }
    if let Some(scope) = scope {
        if !identity.can_see(scope) {
            return Err(AppError::Forbidden);
        }
    }
    Ok(())
}
