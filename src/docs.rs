use crate::api::attendance::{AttendanceDetail, EditAttendance, PendingAttendance, VersionedAction};
use crate::api::group::CreateGroup;
use crate::api::holiday::{CreateHoliday, LegalHolidayCount};
use crate::api::mail::{PreviewInput, RenderedMail, Reminder, TemplateInput};
use crate::api::overtime::{CreateOvertime, DecisionNote, OvertimeListResponse};
use crate::api::rest_time::{IntervalInput, RestTemplateDetail, RestTemplateInput};
use crate::api::timecard::ManualPunch;
use crate::api::user::{ChangePassword, CreateUser, UserListResponse};
use crate::auth::handlers::LoginResponse;
use crate::model::{
    attendance::AttendanceLog, group::Group, holiday::Holiday, mail_template::MailTemplate,
    overtime::OvertimeRequest, rest_time::RestInterval, rest_time::RestTimeTemplate,
    timecard::Timecard, user::User,
};
use crate::models::LoginReqDto;
use crate::rules::{
    reconcile::{Reconciled, TimeSource},
    summary::MonthlySummary,
};
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Timecard API",
        version = "0.1.0",
        description = r#"
## Attendance & Timecard Management

Backend for recording working time and getting it approved.

### Key Features
- **Clock-in / clock-out** with day-crossing night shifts
- **Timecard correction** with reasons when an edit lengthens the day
- **Staged approval** through middle, better and top managers
- **Overtime requests** approved ahead of the attendance submission
- **Rest-time templates**, groups, holidays and monthly summaries
- **Mail templates** rendered for missing-punch reminders

### Security
Every endpoint below `/api` requires a JWT bearer access token obtained
from `/auth/login`.
"#,
    ),
    paths(
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,

        crate::api::attendance::clock_in,
        crate::api::attendance::clock_out,
        crate::api::attendance::list_attendance,
        crate::api::attendance::pending_attendance,
        crate::api::attendance::get_attendance,
        crate::api::attendance::edit_attendance,
        crate::api::attendance::submit_attendance,
        crate::api::attendance::withdraw_attendance,
        crate::api::attendance::approve_attendance,
        crate::api::attendance::reject_attendance,
        crate::api::attendance::reopen_attendance,

        crate::api::timecard::list_timecards,
        crate::api::timecard::add_timecard,
        crate::api::timecard::delete_timecard,

        crate::api::overtime::create_overtime,
        crate::api::overtime::list_overtime,
        crate::api::overtime::get_overtime,
        crate::api::overtime::approve_overtime,
        crate::api::overtime::reject_overtime,
        crate::api::overtime::cancel_overtime,

        crate::api::rest_time::list_rest_templates,
        crate::api::rest_time::get_rest_template,
        crate::api::rest_time::create_rest_template,
        crate::api::rest_time::update_rest_template,
        crate::api::rest_time::delete_rest_template,

        crate::api::user::create_user,
        crate::api::user::list_users,
        crate::api::user::me,
        crate::api::user::get_user,
        crate::api::user::update_user,
        crate::api::user::delete_user,
        crate::api::user::change_password,

        crate::api::group::list_groups,
        crate::api::group::get_group,
        crate::api::group::create_group,
        crate::api::group::update_group,
        crate::api::group::delete_group,
        crate::api::group::group_members,

        crate::api::holiday::list_holidays,
        crate::api::holiday::create_holiday,
        crate::api::holiday::delete_holiday,
        crate::api::holiday::legal_holiday_count,

        crate::api::mail::list_templates,
        crate::api::mail::upsert_template,
        crate::api::mail::preview_template,
        crate::api::mail::reminders,

        crate::api::summary::monthly_summary
    ),
    components(
        schemas(
            LoginReqDto,
            LoginResponse,
            AttendanceLog,
            AttendanceDetail,
            PendingAttendance,
            EditAttendance,
            VersionedAction,
            Reconciled,
            TimeSource,
            Timecard,
            ManualPunch,
            OvertimeRequest,
            CreateOvertime,
            DecisionNote,
            OvertimeListResponse,
            RestTimeTemplate,
            RestInterval,
            IntervalInput,
            RestTemplateInput,
            RestTemplateDetail,
            User,
            CreateUser,
            ChangePassword,
            UserListResponse,
            Group,
            CreateGroup,
            Holiday,
            CreateHoliday,
            LegalHolidayCount,
            MailTemplate,
            TemplateInput,
            PreviewInput,
            RenderedMail,
            Reminder,
            MonthlySummary
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login and token rotation"),
        (name = "Attendance", description = "Clocking, corrections and approval"),
        (name = "Timecard", description = "Raw punch entries"),
        (name = "Overtime", description = "Overtime requests"),
        (name = "Rest Time", description = "Rest-time templates"),
        (name = "Users", description = "User administration"),
        (name = "Groups", description = "Groups and approval stages"),
        (name = "Holidays", description = "Holiday calendar"),
        (name = "Mail", description = "Mail templates and reminders"),
        (name = "Summary", description = "Monthly totals"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_resource() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/attendance/clock-in",
            "/api/attendance/{attendance_id}/approve",
            "/api/overtime/{overtime_id}/cancel",
            "/api/notifications/reminders",
            "/api/summary",
            "/auth/login",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path} missing");
        }
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
