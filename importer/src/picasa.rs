//! Album names and descriptions from Picasa's `.picasa.ini` files

use {
    crate::metadata::Album,
    anyhow::{anyhow, Result},
};

/// Return true if `name` is the base name of a Picasa folder description.
pub fn is_picasa_ini(name: &str) -> bool {
    name.eq_ignore_ascii_case(".picasa.ini") || name.eq_ignore_ascii_case("picasa.ini")
}

/// Parse a `.picasa.ini` file.
///
/// Only the `[Picasa]` section is read: its `name` key gives the album title and `description` its
/// description.  Lines starting with `;` or `#` are comments.
pub fn parse(content: &str) -> Result<Album> {
    let mut section = "";
    let mut album = Album::default();

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = name;
        } else if section == "Picasa" {
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| anyhow!("invalid line: {line}"))?;

            match key.trim() {
                "name" => album.title = value.trim().to_owned(),
                "description" => album.description = value.trim().to_owned(),
                _ => (),
            }
        }
    }

    Ok(album)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sections() -> Result<()> {
        let album = parse(
            "[Picasa]\n\
             name=Vacances à la mer\n\
             ; comment\n\
             description = Summer 2009 \n\
             \n\
             [IMG_0001.jpg]\n\
             star=yes\n\
             something without an equal sign\n",
        )?;

        assert_eq!("Vacances à la mer", album.title);
        assert_eq!("Summer 2009", album.description);

        assert!(parse("[Picasa]\nname\n").is_err());
        assert_eq!(Album::default(), parse("# nothing here\n")?);

        assert!(is_picasa_ini(".Picasa.ini"));
        assert!(!is_picasa_ini("picasa.txt"));

        Ok(())
    }
}
