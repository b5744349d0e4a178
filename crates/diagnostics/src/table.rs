//! The pattern and message tables behind [`translate`](crate::translate).
//!
//! Both tables are part of the public contract toward the editor UI: the
//! substrings decide which [`ErrorKind`] a compiler message lands in, and the
//! UI keys icons and behaviour off that kind. Reordering [`PATTERNS`] changes
//! precedence for messages that match more than one row.

use serde::{Deserialize, Serialize};

use crate::Locale;

/// Closed taxonomy of compile failures the editor knows how to explain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmptyShader,
    DuplicateMain,
    MissingMain,
    UndeclaredIdentifier,
    SyntaxError,
    TypeMismatch,
    DivisionByZero,
    ArgumentCount,
    Redefinition,
    InvalidVersion,
    UnsupportedUniform,
    LinkError,
    Unknown,
}

impl ErrorKind {
    /// Stable identifier used by the UI layer.
    pub fn id(self) -> &'static str {
        match self {
            ErrorKind::EmptyShader => "empty_shader",
            ErrorKind::DuplicateMain => "duplicate_main",
            ErrorKind::MissingMain => "missing_main",
            ErrorKind::UndeclaredIdentifier => "undeclared_identifier",
            ErrorKind::SyntaxError => "syntax_error",
            ErrorKind::TypeMismatch => "type_mismatch",
            ErrorKind::DivisionByZero => "division_by_zero",
            ErrorKind::ArgumentCount => "argument_count",
            ErrorKind::Redefinition => "redefinition",
            ErrorKind::InvalidVersion => "invalid_version",
            ErrorKind::UnsupportedUniform => "unsupported_uniform",
            ErrorKind::LinkError => "link_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// One row of the match table: every needle must occur in the lowercased message.
pub(crate) struct Pattern {
    pub needles: &'static [&'static str],
    pub kind: ErrorKind,
}

const fn row(needles: &'static [&'static str], kind: ErrorKind) -> Pattern {
    Pattern { needles, kind }
}

/// Ordered; first match wins.
pub(crate) const PATTERNS: &[Pattern] = &[
    row(&["empty shader"], ErrorKind::EmptyShader),
    row(&["'main'", "already has a body"], ErrorKind::DuplicateMain),
    row(&["'main'", "redefinition"], ErrorKind::DuplicateMain),
    row(&["main", "already defined"], ErrorKind::DuplicateMain),
    row(&["duplicate", "main"], ErrorKind::DuplicateMain),
    row(&["missing entry point"], ErrorKind::MissingMain),
    row(&["entry point", "not found"], ErrorKind::MissingMain),
    row(&["undeclared identifier"], ErrorKind::UndeclaredIdentifier),
    row(&["unknown variable"], ErrorKind::UndeclaredIdentifier),
    row(&["syntax error"], ErrorKind::SyntaxError),
    row(&["unexpected end of file"], ErrorKind::SyntaxError),
    row(&["type mismatch"], ErrorKind::TypeMismatch),
    row(&["cannot convert"], ErrorKind::TypeMismatch),
    row(&["can't convert"], ErrorKind::TypeMismatch),
    row(&["wrong operand types"], ErrorKind::TypeMismatch),
    row(&["incompatible types"], ErrorKind::TypeMismatch),
    row(&["division by zero"], ErrorKind::DivisionByZero),
    row(&["divide by zero"], ErrorKind::DivisionByZero),
    row(&["no matching overloaded function"], ErrorKind::ArgumentCount),
    row(&["too many arguments"], ErrorKind::ArgumentCount),
    row(&["too few arguments"], ErrorKind::ArgumentCount),
    row(&["not enough data provided for construction"], ErrorKind::ArgumentCount),
    row(&["wrong number of arguments"], ErrorKind::ArgumentCount),
    row(&["redefinition"], ErrorKind::Redefinition),
    row(&["already declared"], ErrorKind::Redefinition),
    row(&["already defined"], ErrorKind::Redefinition),
    row(&["#version"], ErrorKind::InvalidVersion),
    row(&["invalid version"], ErrorKind::InvalidVersion),
    row(&["unsupported version"], ErrorKind::InvalidVersion),
    row(&["invalid profile"], ErrorKind::InvalidVersion),
    row(&["unsupported uniform"], ErrorKind::UnsupportedUniform),
    row(&["linker"], ErrorKind::LinkError),
    row(&["link error"], ErrorKind::LinkError),
];

pub(crate) fn classify(message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();
    PATTERNS
        .iter()
        .find(|pattern| pattern.needles.iter().all(|needle| lowered.contains(needle)))
        .map(|pattern| pattern.kind)
        .unwrap_or(ErrorKind::Unknown)
}

pub(crate) struct Text {
    pub title: &'static str,
    pub hint: Option<&'static str>,
}

const fn text(title: &'static str, hint: &'static str) -> Text {
    Text {
        title,
        hint: Some(hint),
    }
}

pub(crate) fn localized(kind: ErrorKind, locale: Locale) -> Text {
    match locale {
        Locale::En => english(kind),
        Locale::Es => spanish(kind),
        Locale::Fr => french(kind),
        Locale::De => german(kind),
    }
}

fn english(kind: ErrorKind) -> Text {
    match kind {
        ErrorKind::EmptyShader => text(
            "Empty shader",
            "Write a main() function that assigns gl_FragColor.",
        ),
        ErrorKind::DuplicateMain => text(
            "main() is defined twice",
            "A shader may only contain one main() function. Remove or rename the extra one.",
        ),
        ErrorKind::MissingMain => text(
            "Missing main()",
            "Every shader needs a void main() entry point.",
        ),
        ErrorKind::UndeclaredIdentifier => text(
            "Undeclared identifier",
            "Check the spelling, and declare the variable or uniform before using it.",
        ),
        ErrorKind::SyntaxError => text(
            "Syntax error",
            "Look for a missing semicolon or an unmatched bracket on or just before this line.",
        ),
        ErrorKind::TypeMismatch => text(
            "Type mismatch",
            "Both sides must have the same type. Write 1.0 instead of 1 for floats, or convert with float().",
        ),
        ErrorKind::DivisionByZero => text(
            "Division by zero",
            "A constant expression divides by zero. Guard the divisor or use a small epsilon.",
        ),
        ErrorKind::ArgumentCount => text(
            "Wrong number of arguments",
            "Check how many components or parameters this function or constructor expects.",
        ),
        ErrorKind::Redefinition => text(
            "Name defined twice",
            "Each variable and function name may only be declared once in the same scope.",
        ),
        ErrorKind::InvalidVersion => text(
            "Unsupported GLSL version",
            "Remove the #version line; the editor picks the right version for you.",
        ),
        ErrorKind::UnsupportedUniform => text(
            "Unsupported uniform type",
            "Uniforms may be float, int, bool, vec2-4, ivec2-4, mat2-4 or sampler2D.",
        ),
        ErrorKind::LinkError => text(
            "Shaders do not fit together",
            "Every varying read by the fragment shader must be written by the vertex shader with the same type.",
        ),
        ErrorKind::Unknown => text("Compilation error", "See the details below."),
    }
}

fn spanish(kind: ErrorKind) -> Text {
    match kind {
        ErrorKind::EmptyShader => text(
            "Shader vacío",
            "Escribe una función main() que asigne gl_FragColor.",
        ),
        ErrorKind::DuplicateMain => text(
            "main() está definida dos veces",
            "Un shader solo puede tener una función main(). Elimina o renombra la otra.",
        ),
        ErrorKind::MissingMain => text(
            "Falta main()",
            "Todo shader necesita un punto de entrada void main().",
        ),
        ErrorKind::UndeclaredIdentifier => text(
            "Identificador no declarado",
            "Revisa la ortografía y declara la variable o el uniform antes de usarlo.",
        ),
        ErrorKind::SyntaxError => text(
            "Error de sintaxis",
            "Busca un punto y coma que falte o un paréntesis sin cerrar en esta línea o en la anterior.",
        ),
        ErrorKind::TypeMismatch => text(
            "Tipos incompatibles",
            "Ambos lados deben tener el mismo tipo. Escribe 1.0 en lugar de 1, o convierte con float().",
        ),
        ErrorKind::DivisionByZero => text(
            "División por cero",
            "Una expresión constante divide entre cero. Protege el divisor o usa un épsilon pequeño.",
        ),
        ErrorKind::ArgumentCount => text(
            "Número de argumentos incorrecto",
            "Comprueba cuántos componentes o parámetros espera esta función o constructor.",
        ),
        ErrorKind::Redefinition => text(
            "Nombre definido dos veces",
            "Cada variable o función solo puede declararse una vez en el mismo ámbito.",
        ),
        ErrorKind::InvalidVersion => text(
            "Versión de GLSL no soportada",
            "Elimina la línea #version; el editor elige la versión correcta.",
        ),
        ErrorKind::UnsupportedUniform => text(
            "Tipo de uniform no soportado",
            "Los uniforms pueden ser float, int, bool, vec2-4, ivec2-4, mat2-4 o sampler2D.",
        ),
        ErrorKind::LinkError => text(
            "Los shaders no encajan",
            "Cada varying que lee el fragment shader debe escribirlo el vertex shader con el mismo tipo.",
        ),
        ErrorKind::Unknown => text("Error de compilación", "Consulta los detalles abajo."),
    }
}

fn french(kind: ErrorKind) -> Text {
    match kind {
        ErrorKind::EmptyShader => text(
            "Shader vide",
            "Écris une fonction main() qui affecte gl_FragColor.",
        ),
        ErrorKind::DuplicateMain => text(
            "main() est définie deux fois",
            "Un shader ne peut contenir qu'une seule fonction main(). Supprime ou renomme l'autre.",
        ),
        ErrorKind::MissingMain => text(
            "main() manquante",
            "Chaque shader a besoin d'un point d'entrée void main().",
        ),
        ErrorKind::UndeclaredIdentifier => text(
            "Identifiant non déclaré",
            "Vérifie l'orthographe et déclare la variable ou l'uniform avant de l'utiliser.",
        ),
        ErrorKind::SyntaxError => text(
            "Erreur de syntaxe",
            "Cherche un point-virgule manquant ou une parenthèse non fermée sur cette ligne ou juste avant.",
        ),
        ErrorKind::TypeMismatch => text(
            "Types incompatibles",
            "Les deux côtés doivent avoir le même type. Écris 1.0 au lieu de 1, ou convertis avec float().",
        ),
        ErrorKind::DivisionByZero => text(
            "Division par zéro",
            "Une expression constante divise par zéro. Protège le diviseur ou utilise un petit epsilon.",
        ),
        ErrorKind::ArgumentCount => text(
            "Mauvais nombre d'arguments",
            "Vérifie combien de composantes ou de paramètres cette fonction ou ce constructeur attend.",
        ),
        ErrorKind::Redefinition => text(
            "Nom défini deux fois",
            "Chaque variable ou fonction ne peut être déclarée qu'une fois dans la même portée.",
        ),
        ErrorKind::InvalidVersion => text(
            "Version GLSL non prise en charge",
            "Supprime la ligne #version ; l'éditeur choisit la bonne version.",
        ),
        ErrorKind::UnsupportedUniform => text(
            "Type d'uniform non pris en charge",
            "Les uniforms peuvent être float, int, bool, vec2-4, ivec2-4, mat2-4 ou sampler2D.",
        ),
        ErrorKind::LinkError => text(
            "Les shaders ne s'accordent pas",
            "Chaque varying lu par le fragment shader doit être écrit par le vertex shader avec le même type.",
        ),
        ErrorKind::Unknown => text("Erreur de compilation", "Voir les détails ci-dessous."),
    }
}

fn german(kind: ErrorKind) -> Text {
    match kind {
        ErrorKind::EmptyShader => text(
            "Leerer Shader",
            "Schreibe eine main()-Funktion, die gl_FragColor setzt.",
        ),
        ErrorKind::DuplicateMain => text(
            "main() ist doppelt definiert",
            "Ein Shader darf nur eine main()-Funktion enthalten. Entferne oder benenne die zweite um.",
        ),
        ErrorKind::MissingMain => text(
            "main() fehlt",
            "Jeder Shader braucht einen Einstiegspunkt void main().",
        ),
        ErrorKind::UndeclaredIdentifier => text(
            "Nicht deklarierter Bezeichner",
            "Prüfe die Schreibweise und deklariere Variable oder Uniform vor der Verwendung.",
        ),
        ErrorKind::SyntaxError => text(
            "Syntaxfehler",
            "Suche nach einem fehlenden Semikolon oder einer offenen Klammer in oder vor dieser Zeile.",
        ),
        ErrorKind::TypeMismatch => text(
            "Typen passen nicht",
            "Beide Seiten brauchen denselben Typ. Schreibe 1.0 statt 1 oder konvertiere mit float().",
        ),
        ErrorKind::DivisionByZero => text(
            "Division durch null",
            "Ein konstanter Ausdruck teilt durch null. Sichere den Divisor ab oder nutze ein kleines Epsilon.",
        ),
        ErrorKind::ArgumentCount => text(
            "Falsche Anzahl an Argumenten",
            "Prüfe, wie viele Komponenten oder Parameter diese Funktion oder dieser Konstruktor erwartet.",
        ),
        ErrorKind::Redefinition => text(
            "Name doppelt definiert",
            "Jede Variable und Funktion darf im selben Gültigkeitsbereich nur einmal deklariert werden.",
        ),
        ErrorKind::InvalidVersion => text(
            "Nicht unterstützte GLSL-Version",
            "Entferne die #version-Zeile; der Editor wählt die passende Version.",
        ),
        ErrorKind::UnsupportedUniform => text(
            "Nicht unterstützter Uniform-Typ",
            "Uniforms dürfen float, int, bool, vec2-4, ivec2-4, mat2-4 oder sampler2D sein.",
        ),
        ErrorKind::LinkError => text(
            "Shader passen nicht zusammen",
            "Jedes Varying, das der Fragment-Shader liest, muss der Vertex-Shader mit gleichem Typ schreiben.",
        ),
        ErrorKind::Unknown => text("Kompilierfehler", "Details siehe unten."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [ErrorKind; 13] = [
        ErrorKind::EmptyShader,
        ErrorKind::DuplicateMain,
        ErrorKind::MissingMain,
        ErrorKind::UndeclaredIdentifier,
        ErrorKind::SyntaxError,
        ErrorKind::TypeMismatch,
        ErrorKind::DivisionByZero,
        ErrorKind::ArgumentCount,
        ErrorKind::Redefinition,
        ErrorKind::InvalidVersion,
        ErrorKind::UnsupportedUniform,
        ErrorKind::LinkError,
        ErrorKind::Unknown,
    ];

    #[test]
    fn every_kind_has_text_in_every_locale() {
        for locale in Locale::ALL {
            for kind in KINDS {
                let text = localized(kind, locale);
                assert!(!text.title.is_empty(), "{kind:?} title missing for {locale}");
                assert!(text.hint.is_some(), "{kind:?} hint missing for {locale}");
            }
        }
    }

    #[test]
    fn patterns_are_lowercase() {
        for pattern in PATTERNS {
            for needle in pattern.needles {
                assert_eq!(*needle, needle.to_lowercase());
            }
        }
    }

    #[test]
    fn duplicate_main_wins_over_generic_redefinition() {
        assert_eq!(classify("'main' : redefinition"), ErrorKind::DuplicateMain);
        assert_eq!(classify("'foo' : redefinition"), ErrorKind::Redefinition);
    }
}
