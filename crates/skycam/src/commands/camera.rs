//! Status, identity, parameter and raw command handlers.

use serde::Serialize;

use skycam_core::{CommandRequest, ResponseStatus};

use crate::cli::SendArgs;
use crate::error::CliError;
use crate::output;

use super::Ctx;

pub async fn status(ctx: &Ctx<'_>) -> Result<(), CliError> {
    let status = ctx.controller.status().await.map_err(|e| ctx.core(e))?;
    let out = output::render(ctx.global, &status, |s| {
        format!("exposure  {} ms\ngain      {}", s.exposure, s.gain)
    })?;
    output::print_output(&out, ctx.global.quiet);
    Ok(())
}

#[derive(Serialize)]
struct InfoView<'a> {
    host: &'a str,
    command_port: u16,
    ftp_port: u16,
    dialect: String,
    banner: Option<&'a str>,
    serial_number: Option<&'a str>,
}

pub fn info(ctx: &Ctx<'_>) -> Result<(), CliError> {
    let info = ctx.controller.camera_info().unwrap_or_default();
    let conn = &ctx.resolved.connection;
    let view = InfoView {
        host: &conn.host,
        command_port: conn.command_port,
        ftp_port: conn.ftp_port,
        dialect: conn.dialect.to_string(),
        banner: Some(info.banner.as_str()).filter(|b| !b.is_empty()),
        serial_number: info.serial_number.as_deref(),
    };
    let out = output::render(ctx.global, &view, |v| {
        format!(
            "host      {}:{} (ftp {})\ndialect   {}\nbanner    {}\nserial    {}",
            v.host,
            v.command_port,
            v.ftp_port,
            v.dialect,
            v.banner.unwrap_or("-"),
            v.serial_number.unwrap_or("-"),
        )
    })?;
    output::print_output(&out, ctx.global.quiet);
    Ok(())
}

#[derive(Serialize)]
struct ParameterView {
    parameter: &'static str,
    value: f64,
}

pub async fn exposure(ctx: &Ctx<'_>, value: f64) -> Result<(), CliError> {
    let value = ctx
        .controller
        .set_exposure(value)
        .await
        .map_err(|e| ctx.core(e))?;
    print_parameter(ctx, "exposure", value, " ms")
}

pub async fn gain(ctx: &Ctx<'_>, value: f64) -> Result<(), CliError> {
    let value = ctx
        .controller
        .set_gain(value)
        .await
        .map_err(|e| ctx.core(e))?;
    print_parameter(ctx, "gain", value, "")
}

fn print_parameter(
    ctx: &Ctx<'_>,
    parameter: &'static str,
    value: f64,
    unit: &str,
) -> Result<(), CliError> {
    let view = ParameterView { parameter, value };
    let out = output::render(ctx.global, &view, |v| {
        format!("{} set to {}{unit}", v.parameter, v.value)
    })?;
    output::print_output(&out, ctx.global.quiet);
    Ok(())
}

pub async fn send(ctx: &Ctx<'_>, args: &SendArgs) -> Result<(), CliError> {
    let request = CommandRequest::new(args.words.join(" "));
    let response = ctx
        .controller
        .command(&request)
        .await
        .map_err(|e| ctx.core(e))?;

    match response.status {
        ResponseStatus::Ok => {
            let out = output::render(ctx.global, &response, |r| r.payload.clone())?;
            output::print_output(&out, ctx.global.quiet);
            Ok(())
        }
        ResponseStatus::Error => Err(CliError::Rejected {
            verb: request.verb,
            message: response.payload,
        }),
        ResponseStatus::Timeout => Err(CliError::Timeout {
            timeout_ms: u64::try_from(ctx.resolved.connection.timeout.as_millis())
                .unwrap_or(u64::MAX),
        }),
    }
}
