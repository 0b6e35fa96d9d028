//! Source (English) phrases for every notification.
//!
//! Placeholders use `{Field}`; translations are keyed by these exact strings.

/// Phrases making up one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Template {
    pub name: &'static str,
    pub subject: &'static str,
    pub greeting: &'static str,
    pub message: &'static str,
    pub call_to_action: &'static str,
}

pub const SHARE_CREATED: Template = Template {
    name: "share_created",
    subject: "{ShareSharer} shared '{ShareFolder}' with you",
    greeting: "Hello {ShareGrantee}",
    message: "{ShareSharer} has shared \"{ShareFolder}\" with you.",
    call_to_action: "Click here to view it: {ShareLink}",
};

pub const SHARE_EXPIRED: Template = Template {
    name: "share_expired",
    subject: "Share to '{ShareFolder}' expired at {ExpiredAt}",
    greeting: "Hello {ShareGrantee},",
    message: "Your share to {ShareFolder} has expired at {ExpiredAt}\n\nEven though this share has been revoked you still might have access through other shares and/or space memberships.",
    call_to_action: "",
};

pub const SHARE_REMOVED: Template = Template {
    name: "share_removed",
    subject: "{ShareSharer} unshared '{ShareFolder}' with you",
    greeting: "Hello {ShareGrantee},",
    message: "{ShareSharer} has unshared '{ShareFolder}' with you.\n\nEven though this share has been revoked you still might have access through other shares and/or space memberships.",
    call_to_action: "",
};

pub const SPACE_SHARED: Template = Template {
    name: "space_shared",
    subject: "{SpaceSharer} invited you to join {SpaceName}",
    greeting: "Hello {SpaceGrantee},",
    message: "{SpaceSharer} has invited you to join \"{SpaceName}\".",
    call_to_action: "Click here to view it: {ShareLink}",
};

pub const SPACE_UNSHARED: Template = Template {
    name: "space_unshared",
    subject: "{SpaceSharer} removed you from {SpaceName}",
    greeting: "Hello {SpaceGrantee},",
    message: "{SpaceSharer} has removed you from \"{SpaceName}\".\n\nYou might still have access through your other groups or direct membership.",
    call_to_action: "Click here to check it: {ShareLink}",
};

pub const SPACE_MEMBERSHIP_EXPIRED: Template = Template {
    name: "space_membership_expired",
    subject: "Membership of '{SpaceName}' expired at {ExpiredAt}",
    greeting: "Hello {SpaceGrantee},",
    message: "Your membership of space {SpaceName} has expired at {ExpiredAt}\n\nEven though this membership has expired you still might have access through other shares and/or space memberships",
    call_to_action: "",
};

pub const SCIENCE_MESH_INVITE: Template = Template {
    name: "science_mesh_invite",
    subject: "ScienceMesh: {InviteSharer} wants to collaborate with you",
    greeting: "Hi,",
    message: "{InviteSharer} ({InviteSharerMail}) wants to start sharing collaboration resources with you.\n\nToken: {Token}\nDescription: {Description}",
    call_to_action: "Please visit your federation settings and use the following details: {InviteLink}",
};

/// Envelope of a grouped digest; the body is made of other templates' messages.
pub const GROUPED: Template = Template {
    name: "grouped",
    subject: "Report",
    greeting: "Hi {DisplayName},",
    message: "",
    call_to_action: "",
};

#[cfg(test)]
pub const ALL: [Template; 8] = [
    SHARE_CREATED,
    SHARE_EXPIRED,
    SHARE_REMOVED,
    SPACE_SHARED,
    SPACE_UNSHARED,
    SPACE_MEMBERSHIP_EXPIRED,
    SCIENCE_MESH_INVITE,
    GROUPED,
];
