use crate::error::ValidationError;

/// MIME type inferred from a lowercase media file extension.
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "aac" => "audio/aac",
        "wav" => "audio/x-wav",
        "m4a" => "audio/mp4",
        "ogg" => "audio/ogg",
        _ => return None,
    })
}

/// Strip any path components a sender may smuggle into a file name.
pub fn sanitize_file_name(name: &str) -> String {
    name.rsplit(['/', '\\']).next().unwrap_or(name).to_string()
}

/// Gate a candidate upload against the allowed formats and size limit.
///
/// Checks run in order and stop at the first failure: extension membership,
/// size against the tier limit, then declared MIME type against the
/// extension-inferred one (only when the transport declared a MIME type at
/// all). No side effects.
pub fn validate(
    file_name: &str,
    file_size: u64,
    declared_mime: Option<&str>,
    allowed_formats: &[String],
    size_limit: u64,
) -> Result<(), ValidationError> {
    let ext = file_name
        .rsplit('.')
        .next()
        .unwrap_or(file_name)
        .to_lowercase();

    if !allowed_formats.iter().any(|f| f.eq_ignore_ascii_case(&ext)) {
        return Err(ValidationError::UnsupportedFormat(ext));
    }

    if file_size > size_limit {
        return Err(ValidationError::SizeExceeded {
            size: file_size,
            limit: size_limit,
        });
    }

    if let Some(declared) = declared_mime {
        let inferred = mime_for_extension(&ext).unwrap_or("application/octet-stream");
        if inferred != declared {
            return Err(ValidationError::MimeMismatch {
                declared: declared.to_string(),
                inferred: inferred.to_string(),
            });
        }
    }

    Ok(())
}
