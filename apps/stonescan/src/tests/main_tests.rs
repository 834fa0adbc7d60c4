use super::*;
use clap::CommandFactory;
use shared::error::ApiError;

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn parses_upload_with_annotated_output() {
    let cli = Cli::try_parse_from([
        "stonescan",
        "--server-url",
        "http://gateway:3000",
        "upload",
        "scan.png",
        "--annotated-out",
        "annotated.jpg",
    ])
    .expect("parse");
    assert_eq!(cli.server_url, "http://gateway:3000");
    match cli.command {
        Command::Upload {
            image,
            annotated_out,
            json,
        } => {
            assert_eq!(image, PathBuf::from("scan.png"));
            assert_eq!(annotated_out, Some(PathBuf::from("annotated.jpg")));
            assert!(!json);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn only_auth_gate_rejections_clear_the_session() {
    let expired = ClientError::Rejected {
        status: 401,
        body: ApiError::new("Session expired"),
    };
    assert!(session_rejected(&expired));

    let wrong_password = ClientError::Rejected {
        status: 401,
        body: ApiError::new("Invalid email or password"),
    };
    assert!(!session_rejected(&wrong_password));
    assert!(!session_rejected(&ClientError::NotSignedIn));
}

#[test]
fn analysis_falls_back_to_last_upload() {
    let profile = Profile {
        last_analysis_id: Some(9),
        ..Profile::default()
    };
    assert_eq!(resolve_analysis(None, &profile).expect("id"), AnalysisId(9));
    assert_eq!(resolve_analysis(Some(2), &profile).expect("id"), AnalysisId(2));
    assert!(resolve_analysis(None, &Profile::default()).is_err());
}
